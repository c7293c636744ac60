//! Global change-number index
//!
//! Maps a server-wide, strictly increasing change number to the
//! `(domain, CSN)` of the update it designates. Shares the
//! [`OrderedStore`] primitive with replica logs, keyed by change number.
//!
//! ## Retention
//!
//! The index is always purged before the replica logs. [`purge_up_to`]
//! returns the smallest CSN left in the index, and replica logs are never
//! purged past it, so the index never refers to purged updates. Updates of
//! different replicas reach the index out of CSN order, so the smallest CSN
//! is not necessarily the one of the oldest change number.
//!
//! [`purge_up_to`]: ChangeNumberIndex::purge_up_to

use crate::ordered::{OrderedStore, StoreCursor};
use changelog_core::{
    ChangeNumberRecord, Csn, CursorOptions, DomainId, Error, KeyMatchingStrategy,
    PositionStrategy, Result,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

const STORE_NAME: &str = "change number index";

/// Global change number -> (domain, CSN) index
pub struct ChangeNumberIndex {
    store: Arc<OrderedStore<u64, ChangeNumberRecord>>,
    /// Serializes change number allocation in [`ChangeNumberIndex::add`]
    allocator: Mutex<()>,
    /// Survives purges that empty the index
    last_generated: AtomicU64,
}

impl ChangeNumberIndex {
    /// Create an empty in-memory index; the first allocated change number is 1
    pub fn new() -> Self {
        Self {
            store: Arc::new(OrderedStore::new(STORE_NAME)),
            allocator: Mutex::new(()),
            last_generated: AtomicU64::new(0),
        }
    }

    /// Open the index journaled at `path`
    ///
    /// Allocation resumes after the highest change number ever stored, even
    /// if every record was purged before the restart.
    pub fn open(path: &Path) -> Result<Self> {
        let store = OrderedStore::open(STORE_NAME, path)?;
        let last_generated = store.high_water()?.unwrap_or(0);
        debug!(last_generated, records = store.len()?, "Opened change number index");
        Ok(Self {
            store: Arc::new(store),
            allocator: Mutex::new(()),
            last_generated: AtomicU64::new(last_generated),
        })
    }

    /// Append a record whose change number was assigned by the caller
    ///
    /// Returns `Ok(false)` if the change number is not greater than the
    /// newest stored one; the record is then dropped.
    pub fn append(&self, record: ChangeNumberRecord) -> Result<bool> {
        let change_number = record.change_number;
        let appended = self.store.append(change_number, record)?;
        if appended {
            self.last_generated.fetch_max(change_number, Ordering::AcqRel);
        } else {
            warn!(change_number, "Dropping out of order change number record");
        }
        Ok(appended)
    }

    /// Assign the next change number to `(domain, csn)` and append it
    ///
    /// Returns the assigned change number.
    pub fn add(&self, domain: &DomainId, csn: Csn) -> Result<u64> {
        let _guard = self.allocator.lock();
        let change_number = self.last_generated.load(Ordering::Acquire) + 1;
        let record = ChangeNumberRecord::new(change_number, domain.clone(), csn);
        if !self.store.append(change_number, record)? {
            return Err(Error::InconsistentState(format!(
                "change number {} already allocated",
                change_number
            )));
        }
        self.last_generated.store(change_number, Ordering::Release);
        Ok(change_number)
    }

    /// Oldest record
    pub fn read_first(&self) -> Result<Option<ChangeNumberRecord>> {
        Ok(self.store.oldest()?.map(|(_, record)| record))
    }

    /// Newest record
    pub fn read_last(&self) -> Result<Option<ChangeNumberRecord>> {
        Ok(self.store.newest()?.map(|(_, record)| record))
    }

    /// Record for one change number
    pub fn get(&self, change_number: u64) -> Result<Option<ChangeNumberRecord>> {
        self.store.get(&change_number)
    }

    /// Number of stored records
    pub fn record_count(&self) -> Result<usize> {
        self.store.len()
    }

    /// Highest change number ever stored, even if since purged
    pub fn last_generated_change_number(&self) -> u64 {
        self.last_generated.load(Ordering::Acquire)
    }

    /// Purge records whose CSN is older than `floor`
    ///
    /// Records are removed from the oldest change number onward and the walk
    /// stops at the first record whose CSN is not older than `floor`.
    ///
    /// Returns the smallest CSN among the remaining records, or `None` if
    /// the index is empty or was closed by a concurrent shutdown.
    pub fn purge_up_to(&self, floor: &Csn) -> Result<Option<Csn>> {
        let purged = match self.store.purge_while(|_, record| record.csn < *floor) {
            Ok(purged) => purged,
            Err(Error::StoreUnavailable { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if purged > 0 {
            debug!(purged, floor = %floor, "Purged change number index");
        }
        match self.store.min_of(|record| record.csn) {
            Ok(oldest) => Ok(oldest),
            Err(Error::StoreUnavailable { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Open a cursor positioned on `from_change_number`
    ///
    /// If that change number was purged or not yet assigned, the cursor
    /// starts at the next higher one. `None` starts from the oldest record.
    pub fn cursor(&self, from_change_number: Option<u64>) -> Result<StoreCursor<u64, ChangeNumberRecord>> {
        self.store.cursor(
            from_change_number.as_ref(),
            CursorOptions::new(
                KeyMatchingStrategy::GreaterThanOrEqualToKey,
                PositionStrategy::OnMatchingKey,
            ),
        )
    }

    /// Drop every record of `domain`
    pub fn clear_domain(&self, domain: &DomainId) -> Result<usize> {
        let removed = self.store.remove_where(|_, record| record.domain == *domain)?;
        if removed > 0 {
            debug!(domain = %domain, removed, "Cleared domain from change number index");
        }
        Ok(removed)
    }

    /// Close the index and delete its file, if any
    pub fn destroy(&self) -> Result<()> {
        self.store.destroy()
    }

    /// Drop every record and reset the change number counter
    pub fn clear(&self) -> Result<()> {
        let _guard = self.allocator.lock();
        self.store.clear()?;
        self.last_generated.store(0, Ordering::Release);
        Ok(())
    }

    /// Close the index; later operations fail with `StoreUnavailable`
    pub fn close(&self) {
        self.store.close()
    }

    /// Whether the index was closed
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }
}

impl Default for ChangeNumberIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeNumberIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNumberIndex")
            .field("store", &self.store)
            .field("last_generated", &self.last_generated_change_number())
            .finish()
    }
}
