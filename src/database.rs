//! Main changelog entry point.
//!
//! This module provides the `Changelog` struct, the primary entry point for
//! all changelog operations.

use crate::error::{Error, Result};
use changelog_core::{
    ChangeNumberRecord, Csn, CursorOptions, DomainId, MultiDomainServerState, ReplicaId,
    ServerState, UpdateRecord,
};
use changelog_engine::{
    ChangelogConfig, ChangelogDb, Clock, DomainCursor, MultiDomainCursor, PurgeOutcome,
    ReplicaCursor, SystemClock,
};
use changelog_storage::StoreCursor;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

/// The replication changelog.
///
/// Create one using [`Changelog::open`], [`Changelog::ephemeral`] or
/// [`Changelog::builder`].
///
/// # Example
///
/// ```ignore
/// use changelogdb::prelude::*;
///
/// let changelog = Changelog::open("./changelog")?;
///
/// // Producer side
/// let domain = DomainId::new("dc=example,dc=com");
/// changelog.publish_update(&domain, UpdateRecord::new(csn, payload))?;
///
/// // Consumer side
/// let mut cursor =
///     changelog.open_cursor_for_domain(&domain, &ServerState::new(), CursorOptions::default())?;
/// while cursor.next()? {
///     send(cursor.record());
/// }
///
/// // Graceful shutdown
/// changelog.close();
/// ```
pub struct Changelog {
    inner: ChangelogDb,
}

impl Changelog {
    /// Open a changelog persisting its state under `path`.
    ///
    /// Uses default settings: 3 day purge delay, change numbers enabled.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::builder().path(path).open()
    }

    /// Create a changelog that writes nothing to disk.
    ///
    /// # Comparison
    ///
    /// | Method | Disk Files | Survives restart |
    /// |--------|------------|------------------|
    /// | `Changelog::ephemeral()` | None | No |
    /// | `Changelog::builder().open_temp()` | Temp dir | Yes |
    /// | `Changelog::open(path)` | User dir | Yes |
    pub fn ephemeral() -> Result<Self> {
        Self::builder().ephemeral().open()
    }

    /// Create a builder for changelog configuration.
    pub fn builder() -> ChangelogBuilder {
        ChangelogBuilder::new()
    }

    /// Store an update; returns true if it created its replica log.
    pub fn publish_update(&self, domain: &DomainId, record: UpdateRecord) -> Result<bool> {
        self.inner.publish_update(domain, record).map_err(Error::from)
    }

    /// Record that a replica is alive at `csn`.
    pub fn replica_heartbeat(&self, domain: &DomainId, replica_id: ReplicaId, csn: Csn) -> Result<()> {
        self.inner
            .replica_heartbeat(domain, replica_id, csn)
            .map_err(Error::from)
    }

    /// Record that a replica went offline at `csn`.
    pub fn notify_replica_offline(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        csn: Csn,
    ) -> Result<()> {
        self.inner
            .notify_replica_offline(domain, replica_id, csn)
            .map_err(Error::from)
    }

    /// Open a cursor over one replica log.
    pub fn open_cursor_for_replica(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        from: Option<&Csn>,
        options: CursorOptions,
    ) -> Result<ReplicaCursor> {
        self.inner
            .open_cursor_for_replica(domain, replica_id, from, options)
            .map_err(Error::from)
    }

    /// Open a cursor over every replica of a domain.
    pub fn open_cursor_for_domain(
        &self,
        domain: &DomainId,
        from: &ServerState,
        options: CursorOptions,
    ) -> Result<DomainCursor> {
        self.inner
            .open_cursor_for_domain(domain, from, options)
            .map_err(Error::from)
    }

    /// Open a cursor over every domain not in `excluded`.
    pub fn open_cursor_across_domains(
        &self,
        from: &MultiDomainServerState,
        options: CursorOptions,
        excluded: &BTreeSet<DomainId>,
    ) -> Result<MultiDomainCursor> {
        self.inner
            .open_cursor_across_domains(from, options, excluded)
            .map_err(Error::from)
    }

    /// Open a cursor over the change-number index.
    pub fn change_number_index_cursor(
        &self,
        from_change_number: Option<u64>,
    ) -> Result<StoreCursor<u64, ChangeNumberRecord>> {
        self.inner
            .change_number_index_cursor(from_change_number)
            .map_err(Error::from)
    }

    /// Oldest change number still in the index.
    pub fn oldest_change_number(&self) -> Result<u64> {
        self.inner.oldest_change_number().map_err(Error::from)
    }

    /// Newest change number in the index.
    pub fn newest_change_number(&self) -> Result<u64> {
        self.inner.newest_change_number().map_err(Error::from)
    }

    /// Oldest stored CSN of every replica of a domain.
    pub fn oldest_csns(&self, domain: &DomainId) -> Result<ServerState> {
        self.inner.oldest_csns(domain).map_err(Error::from)
    }

    /// Newest stored CSN of every replica of a domain.
    pub fn newest_csns(&self, domain: &DomainId) -> Result<ServerState> {
        self.inner.newest_csns(domain).map_err(Error::from)
    }

    /// Known domains.
    pub fn domains(&self) -> Vec<DomainId> {
        self.inner.domains()
    }

    /// Generation id of a domain.
    pub fn domain_generation_id(&self, domain: &DomainId) -> Option<i64> {
        self.inner.domain_generation_id(domain)
    }

    /// Set and persist the generation id of a domain.
    pub fn set_generation_id(&self, domain: &DomainId, generation_id: i64) -> Result<()> {
        self.inner
            .set_generation_id(domain, generation_id)
            .map_err(Error::from)
    }

    /// Change the purge delay; zero disables automatic purging.
    pub fn set_purge_delay(&self, delay: Duration) -> Result<()> {
        self.inner.set_purge_delay(delay).map_err(Error::from)
    }

    /// Current purge delay.
    pub fn purge_delay(&self) -> Duration {
        self.inner.purge_delay()
    }

    /// Start or stop maintaining the change-number index.
    pub fn set_compute_change_number(&self, enabled: bool) {
        self.inner.set_compute_change_number(enabled)
    }

    /// Whether the change-number index is maintained.
    pub fn compute_change_number(&self) -> bool {
        self.inner.compute_change_number()
    }

    /// Purge one replica log before `csn`, whatever the purge delay.
    pub fn purge_before(&self, domain: &DomainId, replica_id: ReplicaId, csn: &Csn) -> Result<usize> {
        self.inner
            .purge_before(domain, replica_id, csn)
            .map_err(Error::from)
    }

    /// Run one retention cycle now.
    pub fn purge_now(&self) -> Result<PurgeOutcome> {
        self.inner.purge_now().map_err(Error::from)
    }

    /// Remove a domain and everything recorded about it.
    pub fn remove_domain(&self, domain: &DomainId) -> Result<bool> {
        self.inner.remove_domain(domain).map_err(Error::from)
    }

    /// Remove every domain and the change-number index.
    pub fn clear_all(&self) -> Result<()> {
        self.inner.clear_all().map_err(Error::from)
    }

    /// Number of live cursors listening for new replica logs.
    pub fn live_cursor_count(&self) -> usize {
        self.inner.live_cursor_count()
    }

    /// Register the callback invoked when a fatal error halts the changelog.
    pub fn set_fatal_handler(&self, handler: impl Fn(&changelog_core::Error) + Send + Sync + 'static) {
        self.inner.set_fatal_handler(handler)
    }

    /// Whether a fatal error halted the changelog.
    pub fn is_halted(&self) -> bool {
        self.inner.is_halted()
    }

    /// Gracefully close the changelog.
    ///
    /// Stops the purger and closes every store. Also done on drop.
    pub fn close(&self) {
        self.inner.shutdown()
    }

    /// Get the state directory, if any.
    pub fn path(&self) -> Option<&Path> {
        self.inner.path()
    }

    /// Check if this changelog writes nothing to disk.
    pub fn is_ephemeral(&self) -> bool {
        self.inner.is_ephemeral()
    }

    /// The underlying engine changelog.
    pub fn engine(&self) -> &ChangelogDb {
        &self.inner
    }
}

impl std::fmt::Debug for Changelog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Changelog").field("inner", &self.inner).finish()
    }
}

/// Builder for changelog configuration.
///
/// # Example
///
/// ```ignore
/// // Production: state persisted under a directory
/// let changelog = Changelog::builder()
///     .path("./changelog")
///     .purge_delay(Duration::from_secs(24 * 3600))
///     .open()?;
///
/// // Integration testing: temp directory
/// let changelog = Changelog::builder().open_temp()?;
///
/// // Unit testing: nothing on disk
/// let changelog = Changelog::ephemeral()?;
/// ```
pub struct ChangelogBuilder {
    config: ChangelogConfig,
    clock: Option<Arc<dyn Clock>>,
}

impl ChangelogBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ChangelogConfig::default(),
            clock: None,
        }
    }

    /// Set the state directory.
    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.data_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Keep everything in memory.
    pub fn ephemeral(mut self) -> Self {
        self.config.data_dir = None;
        self
    }

    /// Minimum age before a record may be purged; zero disables purging.
    pub fn purge_delay(mut self, delay: Duration) -> Self {
        self.config.purge_delay_ms = duration_ms(delay);
        self
    }

    /// Whether the change-number index is maintained.
    pub fn compute_change_number(mut self, enabled: bool) -> Self {
        self.config.compute_change_number = enabled;
        self
    }

    /// Upper bound of the purger's sleep between cycles.
    pub fn max_purge_sleep(mut self, sleep: Duration) -> Self {
        self.config.max_purge_sleep_ms = duration_ms(sleep);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ChangelogConfig) -> Self {
        self.config = config;
        self
    }

    /// Read time from `clock` instead of the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Open the changelog.
    ///
    /// # Errors
    ///
    /// `Rejected` if the configuration is invalid.
    pub fn open(self) -> Result<Changelog> {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let inner = ChangelogDb::open_with_clock(self.config, clock)?;
        Ok(Changelog { inner })
    }

    /// Open a changelog in a fresh temporary directory.
    pub fn open_temp(self) -> Result<Changelog> {
        let dir = unique_temp_dir();
        std::fs::create_dir_all(&dir)?;
        debug!(path = %dir.display(), "opening changelog in temp dir");
        self.path(dir).open()
    }
}

impl Default for ChangelogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn unique_temp_dir() -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    std::env::temp_dir().join(format!(
        "changelog-{}-{}-{}",
        std::process::id(),
        nanos,
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ))
}
