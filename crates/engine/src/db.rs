//! The changelog database
//!
//! [`ChangelogDb`] owns every component of one changelog:
//!
//! | Component | Role |
//! |-----------|------|
//! | [`ChangelogStateStore`] | Durable replica membership, generation ids, offline markers |
//! | [`ReplicaRegistry`] | Replica logs and live cursor subscriptions |
//! | [`ChangeNumberIndex`] | Global change-number view |
//! | [`ChangeNumberIndexer`] | Feeds the index from published events |
//! | [`RetentionPurger`] | Background purge of the index and the logs |
//!
//! ## Lifecycle
//!
//! `open` loads the state journal, reopens every known replica log and the
//! change-number index from the data directory, then starts the purger. `shutdown` (also run on drop) stops the purger and
//! closes every store; later operations fail with `StoreUnavailable`.
//!
//! A fatal error in the purger halts the changelog: publishes then fail
//! with `InconsistentState` and the registered fatal handler is invoked
//! once.

use crate::clock::{Clock, SystemClock};
use crate::config::ChangelogConfig;
use crate::cursor::{DomainCursor, MultiDomainCursor, ReplicaCursor};
use crate::indexer::{ChangeNumberIndexer, SequentialIndexer};
use crate::purger::{FatalHandler, PurgeOutcome, RetentionPurger};
use crate::registry::ReplicaRegistry;
use changelog_core::{
    ChangeNumberRecord, Csn, CursorOptions, DomainId, Error, MultiDomainServerState, ReplicaId,
    Result, ServerState, UpdateRecord,
};
use changelog_durability::ChangelogStateStore;
use changelog_storage::{ChangeNumberIndex, StoreCursor};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Change-number index journal, inside the data directory
const INDEX_FILE_NAME: &str = "changenumber.index";

#[derive(Default)]
struct FatalState {
    halted: AtomicBool,
    reason: Mutex<Option<String>>,
    handler: Mutex<Option<FatalHandler>>,
}

impl FatalState {
    /// Halt the changelog; only the first call has any effect
    fn escalate(&self, cause: &Error) {
        if self.halted.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.reason.lock() = Some(cause.to_string());
        error!(error = %cause, "Changelog halted");
        let handler = self.handler.lock().clone();
        if let Some(handler) = handler {
            handler(cause);
        }
    }
}

/// One changelog: replica logs, change-number index and retention
pub struct ChangelogDb {
    registry: Arc<ReplicaRegistry>,
    index: Arc<ChangeNumberIndex>,
    state_store: Arc<ChangelogStateStore>,
    indexer: Arc<dyn ChangeNumberIndexer>,
    compute_change_number: AtomicBool,
    purger: RetentionPurger,
    fatal: Arc<FatalState>,
    shut_down: AtomicBool,
}

impl ChangelogDb {
    /// Open a changelog using the system clock
    pub fn open(config: ChangelogConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open a changelog whose retention reads time from `clock`
    ///
    /// # Errors
    ///
    /// - `ConfigurationRejected` if the configuration is invalid
    /// - `Corruption` or `Io` if the state journal, a replica log or the
    ///   change-number index cannot be loaded
    pub fn open_with_clock(config: ChangelogConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        let state_store = Arc::new(match &config.data_dir {
            Some(dir) => ChangelogStateStore::open(dir)?,
            None => ChangelogStateStore::ephemeral(),
        });
        let state = state_store.load()?;

        let registry = Arc::new(ReplicaRegistry::new(Arc::clone(&state_store)));
        registry.restore(&state)?;

        let index = Arc::new(match &config.data_dir {
            Some(dir) => ChangeNumberIndex::open(&dir.join(INDEX_FILE_NAME))?,
            None => ChangeNumberIndex::new(),
        });
        let indexer: Arc<dyn ChangeNumberIndexer> =
            Arc::new(SequentialIndexer::new(Arc::clone(&index)));

        let fatal = Arc::new(FatalState::default());
        let on_fatal: FatalHandler = {
            let fatal = Arc::clone(&fatal);
            Arc::new(move |cause: &Error| fatal.escalate(cause))
        };
        let purger = RetentionPurger::start(
            Arc::clone(&registry),
            Arc::clone(&index),
            clock,
            &config,
            on_fatal,
        )?;

        info!(
            path = ?config.data_dir,
            domains = state.domain_count(),
            purge_delay_ms = config.purge_delay_ms,
            compute_change_number = config.compute_change_number,
            "Opened changelog"
        );

        Ok(Self {
            registry,
            index,
            state_store,
            indexer,
            compute_change_number: AtomicBool::new(config.compute_change_number),
            purger,
            fatal,
            shut_down: AtomicBool::new(false),
        })
    }

    fn check_writable(&self) -> Result<()> {
        if self.fatal.halted.load(Ordering::Acquire) {
            let reason = self.fatal.reason.lock().clone().unwrap_or_default();
            return Err(Error::InconsistentState(format!(
                "changelog halted: {}",
                reason
            )));
        }
        self.check_open()
    }

    fn check_open(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Error::store_unavailable("changelog"));
        }
        Ok(())
    }

    // ========================================================================
    // Producer side
    // ========================================================================

    /// Store an update in its replica log
    ///
    /// Returns true if this update created the replica log. Updates not
    /// newer than the newest one already stored for the replica are
    /// skipped. With change numbers enabled, stored updates are forwarded to
    /// the indexer.
    pub fn publish_update(&self, domain: &DomainId, record: UpdateRecord) -> Result<bool> {
        self.check_writable()?;
        let csn = record.csn;
        let published = self.registry.publish(domain, record)?;
        if published.appended && self.compute_change_number() {
            match self.indexer.publish_update(domain, csn) {
                Ok(()) => {}
                Err(e) if e.is_retryable() => {
                    debug!(domain = %domain, csn = %csn, "Change number index unavailable, update not indexed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(published.log_created)
    }

    /// Record that a replica is alive at `csn`
    pub fn replica_heartbeat(&self, domain: &DomainId, replica_id: ReplicaId, csn: Csn) -> Result<()> {
        self.check_writable()?;
        ReplicaRegistry::check_replica(replica_id, &csn)?;
        self.registry.heartbeat(domain, csn)?;
        if self.compute_change_number() {
            self.indexer.publish_heartbeat(domain, csn)?;
        }
        Ok(())
    }

    /// Record that a replica went offline at `csn`
    ///
    /// Live cursors stop delivering that replica's updates at `csn` until
    /// a newer update or heartbeat brings it back online.
    pub fn notify_replica_offline(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        csn: Csn,
    ) -> Result<()> {
        self.check_writable()?;
        ReplicaRegistry::check_replica(replica_id, &csn)?;
        self.registry.notify_offline(domain, csn)?;
        if self.compute_change_number() {
            self.indexer.replica_offline(domain, csn)?;
        }
        Ok(())
    }

    // ========================================================================
    // Consumer side
    // ========================================================================

    /// Open a cursor over one replica log
    pub fn open_cursor_for_replica(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        from: Option<&Csn>,
        options: CursorOptions,
    ) -> Result<ReplicaCursor> {
        self.check_open()?;
        self.registry
            .open_replica_cursor(domain, replica_id, from, options)
    }

    /// Open a cursor over every replica of a domain
    pub fn open_cursor_for_domain(
        &self,
        domain: &DomainId,
        from: &ServerState,
        options: CursorOptions,
    ) -> Result<DomainCursor> {
        self.check_open()?;
        self.registry.open_domain_cursor(domain, from, options)
    }

    /// Open a cursor over every domain not in `excluded`
    pub fn open_cursor_across_domains(
        &self,
        from: &MultiDomainServerState,
        options: CursorOptions,
        excluded: &BTreeSet<DomainId>,
    ) -> Result<MultiDomainCursor> {
        self.check_open()?;
        self.registry
            .open_multi_domain_cursor(from, options, excluded)
    }

    /// Open a cursor over the change-number index
    ///
    /// Starts at `from_change_number`, or at the next higher one if it was
    /// purged; `None` starts from the oldest record.
    pub fn change_number_index_cursor(
        &self,
        from_change_number: Option<u64>,
    ) -> Result<StoreCursor<u64, ChangeNumberRecord>> {
        self.check_open()?;
        self.index.cursor(from_change_number)
    }

    /// Number of live cursors listening for new replica logs
    pub fn live_cursor_count(&self) -> usize {
        self.registry.live_subscription_count()
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Oldest change number still in the index
    ///
    /// An empty index reports the last generated change number.
    pub fn oldest_change_number(&self) -> Result<u64> {
        Ok(match self.index.read_first()? {
            Some(record) => record.change_number,
            None => self.index.last_generated_change_number(),
        })
    }

    /// Newest change number in the index
    pub fn newest_change_number(&self) -> Result<u64> {
        Ok(match self.index.read_last()? {
            Some(record) => record.change_number,
            None => self.index.last_generated_change_number(),
        })
    }

    /// Oldest stored CSN of every replica of a domain
    pub fn oldest_csns(&self, domain: &DomainId) -> Result<ServerState> {
        let mut state = ServerState::new();
        for entry in self.registry.replicas(domain) {
            if let Some(csn) = entry.log().oldest_csn()? {
                state.update(csn);
            }
        }
        Ok(state)
    }

    /// Newest stored CSN of every replica of a domain
    pub fn newest_csns(&self, domain: &DomainId) -> Result<ServerState> {
        let mut state = ServerState::new();
        for entry in self.registry.replicas(domain) {
            if let Some(csn) = entry.log().newest_csn()? {
                state.update(csn);
            }
        }
        Ok(state)
    }

    /// Known domains, in order
    pub fn domains(&self) -> Vec<DomainId> {
        self.registry.domains()
    }

    /// Generation id of a domain
    pub fn domain_generation_id(&self, domain: &DomainId) -> Option<i64> {
        self.registry.generation_id(domain)
    }

    /// Set and persist the generation id of a domain
    pub fn set_generation_id(&self, domain: &DomainId, generation_id: i64) -> Result<()> {
        self.check_writable()?;
        self.registry.set_generation_id(domain, generation_id)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Change the purge delay; zero disables automatic purging
    ///
    /// # Errors
    ///
    /// `ConfigurationRejected` if the delay is out of range; nothing changes.
    pub fn set_purge_delay(&self, delay: Duration) -> Result<()> {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.purger.set_purge_delay_ms(delay_ms)
    }

    /// Current purge delay
    pub fn purge_delay(&self) -> Duration {
        Duration::from_millis(self.purger.purge_delay_ms())
    }

    /// Whether the change-number index is maintained
    pub fn compute_change_number(&self) -> bool {
        self.compute_change_number.load(Ordering::Acquire)
    }

    /// Start or stop maintaining the change-number index
    pub fn set_compute_change_number(&self, enabled: bool) {
        let previous = self.compute_change_number.swap(enabled, Ordering::AcqRel);
        self.purger.set_compute_change_number(enabled);
        if previous != enabled {
            info!(enabled, "Change number computation toggled");
        }
    }

    /// Purge one replica log before `csn`
    ///
    /// Works whatever the purge delay. Returns the number of records
    /// removed; an unknown replica has none.
    pub fn purge_before(&self, domain: &DomainId, replica_id: ReplicaId, csn: &Csn) -> Result<usize> {
        self.check_open()?;
        match self.registry.replica(domain, replica_id) {
            Some(entry) => entry.log().purge_before(csn),
            None => Ok(0),
        }
    }

    /// Run one retention cycle on the calling thread
    ///
    /// A fatal error halts the changelog as it would in the background.
    pub fn purge_now(&self) -> Result<PurgeOutcome> {
        self.check_open()?;
        self.purger.purge_now().map_err(|e| {
            if e.is_fatal() {
                self.fatal.escalate(&e);
            }
            e
        })
    }

    /// Remove a domain: its logs, index records and persisted state
    ///
    /// Returns false if the domain was unknown.
    pub fn remove_domain(&self, domain: &DomainId) -> Result<bool> {
        self.check_open()?;
        let removed = self.registry.remove_domain(domain)?;
        match self.indexer.clear_domain(domain) {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                debug!(domain = %domain, "Change number index unavailable during domain removal");
            }
            Err(e) => return Err(e),
        }
        Ok(removed)
    }

    /// Remove every domain and the whole change-number index
    pub fn clear_all(&self) -> Result<()> {
        self.check_open()?;
        self.registry.clear_all()?;
        self.index.clear()?;
        info!("Cleared changelog");
        Ok(())
    }

    /// Register the callback invoked when the changelog halts
    pub fn set_fatal_handler(&self, handler: impl Fn(&Error) + Send + Sync + 'static) {
        *self.fatal.handler.lock() = Some(Arc::new(handler));
    }

    /// Whether a fatal error halted the changelog
    pub fn is_halted(&self) -> bool {
        self.fatal.halted.load(Ordering::Acquire)
    }

    /// Description of the error that halted the changelog
    pub fn halt_reason(&self) -> Option<String> {
        self.fatal.reason.lock().clone()
    }

    /// Directory of the state journal; `None` for an ephemeral changelog
    pub fn path(&self) -> Option<&Path> {
        self.state_store.path().and_then(Path::parent)
    }

    /// Whether nothing is written to disk
    pub fn is_ephemeral(&self) -> bool {
        self.state_store.is_ephemeral()
    }

    /// Replica registry
    pub fn registry(&self) -> &Arc<ReplicaRegistry> {
        &self.registry
    }

    /// Change-number index
    pub fn change_number_index(&self) -> &Arc<ChangeNumberIndex> {
        &self.index
    }

    /// Stop the purger and close every store
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        self.purger.shutdown();
        self.registry.close();
        self.index.close();
        info!("Changelog shut down");
    }

    /// Whether `shutdown` was called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for ChangelogDb {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ChangelogDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangelogDb")
            .field("path", &self.path())
            .field("registry", &self.registry)
            .field("index", &self.index)
            .field("purger", &self.purger)
            .field("halted", &self.is_halted())
            .finish()
    }
}
