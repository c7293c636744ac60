//! Replica log
//!
//! Ordered, append-only store of the updates generated by one replica of
//! one domain, keyed by CSN. Appends must carry strictly increasing CSNs;
//! an update at or below the newest CSN ever stored, purged or not, is a
//! replay of something already seen and is skipped.

use crate::ordered::{OrderedStore, StoreCursor};
use changelog_core::{Csn, CursorOptions, DomainId, Error, ReplicaId, Result, UpdateRecord};
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// Updates of one (domain, replica) pair
pub struct ReplicaLog {
    domain: DomainId,
    replica_id: ReplicaId,
    store: Arc<OrderedStore<Csn, UpdateRecord>>,
}

impl ReplicaLog {
    /// Create an empty in-memory log for `replica_id` in `domain`
    pub fn new(domain: DomainId, replica_id: ReplicaId) -> Self {
        let store = Arc::new(OrderedStore::new(store_name(&domain, replica_id)));
        Self {
            domain,
            replica_id,
            store,
        }
    }

    /// Open the log journaled at `path`, restoring its updates
    pub fn open(domain: DomainId, replica_id: ReplicaId, path: &Path) -> Result<Self> {
        let store = Arc::new(OrderedStore::open(store_name(&domain, replica_id), path)?);
        Ok(Self {
            domain,
            replica_id,
            store,
        })
    }

    /// Domain of the log
    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    /// Replica of the log
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Append an update
    ///
    /// Returns `Ok(false)` if the update was skipped because its CSN is not
    /// newer than the newest stored one.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable` if the log was closed concurrently
    /// - `InconsistentState` if the update belongs to another replica
    pub fn append(&self, record: UpdateRecord) -> Result<bool> {
        if record.replica_id() != self.replica_id {
            return Err(Error::InconsistentState(format!(
                "update {} does not belong to replica log {}/{}",
                record.csn, self.domain, self.replica_id
            )));
        }
        let csn = record.csn;
        let appended = self.store.append(csn, record)?;
        if !appended {
            trace!(domain = %self.domain, replica_id = %self.replica_id, csn = %csn, "Skipping already stored update");
        }
        Ok(appended)
    }

    /// CSN of the oldest stored update
    pub fn oldest_csn(&self) -> Result<Option<Csn>> {
        self.store.oldest_key()
    }

    /// CSN of the newest stored update
    pub fn newest_csn(&self) -> Result<Option<Csn>> {
        self.store.newest_key()
    }

    /// Number of stored updates
    pub fn record_count(&self) -> Result<usize> {
        self.store.len()
    }

    /// Remove every update older than `csn`
    ///
    /// Returns the number of removed updates. Idempotent; a CSN older than
    /// the oldest update is a no-op.
    pub fn purge_before(&self, csn: &Csn) -> Result<usize> {
        self.store.purge_before(csn)
    }

    /// Open a cursor
    ///
    /// A `None` start delivers every stored update. See
    /// [`OrderedStore::cursor`] for the positioning rules.
    pub fn cursor(&self, from: Option<&Csn>, options: CursorOptions) -> Result<StoreCursor<Csn, UpdateRecord>> {
        self.store.cursor(from, options)
    }

    /// Remove every update, leaving the log open
    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    /// Close the log; later operations fail with `StoreUnavailable`
    pub fn close(&self) {
        self.store.close()
    }

    /// Close the log and delete its file, if any
    pub fn destroy(&self) -> Result<()> {
        self.store.destroy()
    }

    /// Whether the log was closed
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }
}

fn store_name(domain: &DomainId, replica_id: ReplicaId) -> String {
    format!("replica log {}/{}", domain, replica_id)
}

impl std::fmt::Debug for ReplicaLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaLog")
            .field("domain", &self.domain)
            .field("replica_id", &self.replica_id)
            .field("store", &self.store)
            .finish()
    }
}
