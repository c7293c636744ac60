//! Replica registry
//!
//! Owns the `domain -> replica -> log` map. Replica logs are created lazily
//! on the first publish for a (domain, replica) pair and pushed into every
//! live cursor interested in that domain.
//!
//! ## Creation protocol
//!
//! ```text
//! get_or_create_log(d, r):
//!   state = domains[d] (inserted if missing)
//!   fast path: state.replicas[r] exists -> return it      (no lock)
//!   lock state.create_lock
//!     state removed concurrently?  -> retry with a fresh domain state
//!     state.replicas[r] exists now -> return it
//!     record (d, r) in the state store
//!     insert the new log, notify subscriptions
//! ```
//!
//! At most one log is ever created per (domain, replica). A domain removal
//! takes the same lock, flags the domain state as removed and detaches it
//! from the map, so a publisher racing a removal either completes on the
//! old state (and then finds its log closed and retries) or recreates the
//! domain from scratch.
//!
//! ## Offline markers
//!
//! Each [`ReplicaEntry`] carries the replica's offline CSN in a shared
//! cell. Replica cursors read the cell on every step, so marking a replica
//! offline or online takes effect in live cursors immediately. The cell's
//! write lock is held while the change is persisted, so the state store
//! and the cell always agree on the last writer.
//!
//! ## Files
//!
//! When the state store is file-backed, each log is journaled under
//! `replicas/` next to it, named after the hex-encoded domain and the
//! replica id. A domain removal deletes its log files.

use crate::cursor::{DomainCursor, MultiDomainCursor, ReplicaCursor};
use crate::subscription::{Notification, Scope, SubscriptionRegistry};
use changelog_core::{
    Csn, CursorOptions, DomainId, Error, MultiDomainServerState, ReplicaId, Result, ServerState,
    UpdateRecord,
};
use changelog_durability::{journal, ChangelogState, ChangelogStateStore};
use changelog_storage::ReplicaLog;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Attempts made by [`ReplicaRegistry::publish`] before giving up on a log
/// that keeps being closed under it
const MAX_PUBLISH_ATTEMPTS: usize = 3;

/// Directory of replica log files, next to the state journal
const REPLICA_LOG_DIR: &str = "replicas";

/// One replica log and the replica's offline marker
pub struct ReplicaEntry {
    log: ReplicaLog,
    offline: RwLock<Option<Csn>>,
}

impl ReplicaEntry {
    /// Create an entry with an empty in-memory log
    pub fn new(domain: DomainId, replica_id: ReplicaId, offline: Option<Csn>) -> Self {
        Self::with_log(ReplicaLog::new(domain, replica_id), offline)
    }

    /// Create an entry around an opened log
    pub fn with_log(log: ReplicaLog, offline: Option<Csn>) -> Self {
        Self {
            log,
            offline: RwLock::new(offline),
        }
    }

    /// The replica log
    pub fn log(&self) -> &ReplicaLog {
        &self.log
    }

    /// Domain of the replica
    pub fn domain(&self) -> &DomainId {
        self.log.domain()
    }

    /// Replica id
    pub fn replica_id(&self) -> ReplicaId {
        self.log.replica_id()
    }

    /// CSN at which the replica went offline, if it is offline
    pub fn offline_csn(&self) -> Option<Csn> {
        *self.offline.read()
    }
}

#[cfg(test)]
impl ReplicaEntry {
    pub(crate) fn set_offline(&self, csn: Csn) {
        *self.offline.write() = Some(csn);
    }

    /// Clear the marker if it is still `expected`
    pub(crate) fn clear_offline(&self, expected: Csn) -> bool {
        let mut offline = self.offline.write();
        if *offline == Some(expected) {
            *offline = None;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for ReplicaEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaEntry")
            .field("log", &self.log)
            .field("offline", &self.offline_csn())
            .finish()
    }
}

/// Replica logs and generation id of one domain
pub struct DomainState {
    domain: DomainId,
    replicas: DashMap<ReplicaId, Arc<ReplicaEntry>>,
    generation_id: RwLock<Option<i64>>,
    /// Serializes log creation and removal for this domain
    create_lock: Mutex<()>,
    removed: AtomicBool,
}

impl DomainState {
    fn new(domain: DomainId, generation_id: Option<i64>) -> Self {
        Self {
            domain,
            replicas: DashMap::new(),
            generation_id: RwLock::new(generation_id),
            create_lock: Mutex::new(()),
            removed: AtomicBool::new(false),
        }
    }

    /// Domain identifier
    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    /// Generation id, if known
    pub fn generation_id(&self) -> Option<i64> {
        *self.generation_id.read()
    }

    /// Entry of one replica
    pub fn replica(&self, replica_id: ReplicaId) -> Option<Arc<ReplicaEntry>> {
        self.replicas.get(&replica_id).map(|e| Arc::clone(e.value()))
    }

    /// Entries of every replica, in replica order
    pub fn replicas(&self) -> Vec<Arc<ReplicaEntry>> {
        let mut entries: Vec<_> = self.replicas.iter().map(|e| Arc::clone(e.value())).collect();
        entries.sort_by_key(|e| e.replica_id());
        entries
    }

    /// Replica ids, in order
    pub fn replica_ids(&self) -> Vec<ReplicaId> {
        let mut ids: Vec<_> = self.replicas.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DomainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainState")
            .field("domain", &self.domain)
            .field("replicas", &self.replica_ids())
            .field("generation_id", &self.generation_id())
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// Outcome of [`ReplicaRegistry::publish`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Published {
    /// The replica log was created by this publish
    pub log_created: bool,
    /// The update was stored; false if it was a replay or dropped
    pub appended: bool,
}

/// Dynamic map of replica logs per domain
pub struct ReplicaRegistry {
    domains: DashMap<DomainId, Arc<DomainState>>,
    state_store: Arc<ChangelogStateStore>,
    subscriptions: Arc<SubscriptionRegistry>,
    /// `None` keeps every log in memory
    log_dir: Option<PathBuf>,
}

impl ReplicaRegistry {
    /// Create an empty registry recording membership in `state_store`
    ///
    /// Logs are file-backed exactly when `state_store` is.
    pub fn new(state_store: Arc<ChangelogStateStore>) -> Self {
        let log_dir = state_store
            .path()
            .and_then(|path| path.parent())
            .map(|dir| dir.join(REPLICA_LOG_DIR));
        Self {
            domains: DashMap::new(),
            state_store,
            subscriptions: Arc::new(SubscriptionRegistry::new()),
            log_dir,
        }
    }

    fn log_path(&self, domain: &DomainId, replica_id: ReplicaId) -> Option<PathBuf> {
        let dir = self.log_dir.as_ref()?;
        Some(dir.join(format!("{}-{}.log", hex::encode(domain.as_str()), replica_id)))
    }

    /// Open the log of `(domain, replica_id)`
    ///
    /// A `fresh` log drops whatever a file left by an earlier removal holds.
    fn open_log(&self, domain: &DomainId, replica_id: ReplicaId, fresh: bool) -> Result<ReplicaLog> {
        let Some(path) = self.log_path(domain, replica_id) else {
            return Ok(ReplicaLog::new(domain.clone(), replica_id));
        };
        if fresh {
            journal::remove(&path)?;
        }
        ReplicaLog::open(domain.clone(), replica_id, &path)
    }

    /// Pre-populate domains from the state loaded at startup
    ///
    /// Every known replica gets its log back, reopened from its file when
    /// the registry is file-backed, with its offline marker restored. Must
    /// run before the first publish.
    pub fn restore(&self, state: &ChangelogState) -> Result<()> {
        for (domain, record) in state.domains() {
            let domain_state = Arc::new(DomainState::new(domain.clone(), record.generation_id));
            let known: BTreeSet<ReplicaId> = record
                .replicas
                .iter()
                .chain(record.offline.keys())
                .copied()
                .collect();
            for replica_id in known {
                let log = self.open_log(domain, replica_id, false)?;
                let entry = ReplicaEntry::with_log(log, record.offline_csn(replica_id));
                domain_state.replicas.insert(replica_id, Arc::new(entry));
            }
            debug!(
                domain = %domain,
                replicas = domain_state.replicas.len(),
                generation_id = ?record.generation_id,
                "Restored domain"
            );
            self.domains.insert(domain.clone(), domain_state);
        }
        Ok(())
    }

    /// Subscription registry used by cursors
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Number of live cursor subscriptions
    pub fn live_subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// State of one domain
    pub fn domain(&self, domain: &DomainId) -> Option<Arc<DomainState>> {
        self.domains.get(domain).map(|d| Arc::clone(d.value()))
    }

    /// Known domains, in order
    pub fn domains(&self) -> Vec<DomainId> {
        let mut domains: Vec<_> = self.domains.iter().map(|d| d.key().clone()).collect();
        domains.sort();
        domains
    }

    /// Entry of one replica, without creating it
    pub fn replica(&self, domain: &DomainId, replica_id: ReplicaId) -> Option<Arc<ReplicaEntry>> {
        self.domain(domain)?.replica(replica_id)
    }

    /// Entries of every replica of a domain, in replica order
    pub fn replicas(&self, domain: &DomainId) -> Vec<Arc<ReplicaEntry>> {
        self.domain(domain)
            .map(|d| d.replicas())
            .unwrap_or_default()
    }

    /// Entries of every replica of every domain
    pub fn all_replicas(&self) -> Vec<Arc<ReplicaEntry>> {
        self.domains
            .iter()
            .flat_map(|d| d.value().replicas())
            .collect()
    }

    fn domain_or_insert(&self, domain: &DomainId) -> Arc<DomainState> {
        if let Some(state) = self.domains.get(domain) {
            return Arc::clone(state.value());
        }
        let state = self
            .domains
            .entry(domain.clone())
            .or_insert_with(|| Arc::new(DomainState::new(domain.clone(), None)));
        Arc::clone(state.value())
    }

    /// Log of `(domain, replica_id)`, created if missing
    ///
    /// Returns the entry and whether this call created it.
    pub fn get_or_create_log(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
    ) -> Result<(Arc<ReplicaEntry>, bool)> {
        loop {
            let domain_state = self.domain_or_insert(domain);
            if let Some(entry) = domain_state.replica(replica_id) {
                return Ok((entry, false));
            }

            let _guard = domain_state.create_lock.lock();
            if domain_state.is_removed() {
                continue;
            }
            if let Some(entry) = domain_state.replica(replica_id) {
                return Ok((entry, false));
            }

            let log = self.open_log(domain, replica_id, true)?;
            self.state_store
                .record_replica(domain, replica_id, domain_state.generation_id())?;
            let entry = Arc::new(ReplicaEntry::with_log(log, None));
            domain_state.replicas.insert(replica_id, Arc::clone(&entry));
            info!(domain = %domain, replica_id = %replica_id, "Created replica log");

            self.subscriptions.publish(Notification::ReplicaCreated {
                domain: domain.clone(),
                entry: Arc::clone(&entry),
            });
            return Ok((entry, true));
        }
    }

    /// Append an update to its replica's log, creating the log if needed
    ///
    /// A log closed under the publisher by a concurrent domain removal is
    /// retried against a fresh handle; if it keeps failing the update is
    /// dropped with a warning. An update newer than the replica's offline
    /// CSN brings the replica back online.
    pub fn publish(&self, domain: &DomainId, record: UpdateRecord) -> Result<Published> {
        let replica_id = record.replica_id();
        let csn = record.csn;
        let mut log_created = false;

        for attempt in 1..=MAX_PUBLISH_ATTEMPTS {
            let (entry, created) = self.get_or_create_log(domain, replica_id)?;
            log_created |= created;
            match entry.log().append(record.clone()) {
                Ok(appended) => {
                    self.mark_online_if_newer(&entry, csn)?;
                    return Ok(Published {
                        log_created,
                        appended,
                    });
                }
                Err(e) if e.is_retryable() => {
                    debug!(domain = %domain, replica_id = %replica_id, attempt, "Replica log closed during publish, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(domain = %domain, csn = %csn, "Dropping update: replica log kept closing");
        Ok(Published {
            log_created,
            appended: false,
        })
    }

    /// Record that a replica is alive at `csn`
    ///
    /// Never creates a log. Brings the replica back online if `csn` is newer
    /// than its offline CSN.
    pub fn heartbeat(&self, domain: &DomainId, csn: Csn) -> Result<()> {
        if let Some(entry) = self.replica(domain, csn.replica_id()) {
            self.mark_online_if_newer(&entry, csn)?;
        }
        Ok(())
    }

    /// Record that a replica went offline at `csn`
    ///
    /// The marker is persisted first, then becomes visible to live cursors.
    pub fn notify_offline(&self, domain: &DomainId, csn: Csn) -> Result<()> {
        let replica_id = csn.replica_id();
        let (entry, _) = self.get_or_create_log(domain, replica_id)?;
        let mut marker = entry.offline.write();
        self.state_store.mark_offline(domain, replica_id, csn)?;
        *marker = Some(csn);
        drop(marker);
        info!(domain = %domain, replica_id = %replica_id, csn = %csn, "Replica went offline");
        Ok(())
    }

    fn mark_online_if_newer(&self, entry: &ReplicaEntry, csn: Csn) -> Result<()> {
        if !entry.offline_csn().map_or(false, |offline| csn > offline) {
            return Ok(());
        }
        let mut marker = entry.offline.write();
        // a concurrent notify_offline may have moved the marker
        match *marker {
            Some(offline) if csn > offline => {}
            _ => return Ok(()),
        }
        self.state_store.mark_online(entry.domain(), entry.replica_id())?;
        *marker = None;
        drop(marker);
        info!(domain = %entry.domain(), replica_id = %entry.replica_id(), csn = %csn, "Replica back online");
        Ok(())
    }

    /// Generation id of a domain
    pub fn generation_id(&self, domain: &DomainId) -> Option<i64> {
        self.domain(domain)?.generation_id()
    }

    /// Set and persist the generation id of a domain
    pub fn set_generation_id(&self, domain: &DomainId, generation_id: i64) -> Result<()> {
        loop {
            let domain_state = self.domain_or_insert(domain);
            let _guard = domain_state.create_lock.lock();
            if domain_state.is_removed() {
                continue;
            }
            self.state_store.record_generation_id(domain, generation_id)?;
            let previous = domain_state.generation_id.write().replace(generation_id);
            match previous {
                Some(previous) if previous != generation_id => {
                    info!(domain = %domain, previous, generation_id, "Domain generation id changed");
                }
                None => debug!(domain = %domain, generation_id, "Domain generation id set"),
                _ => {}
            }
            return Ok(());
        }
    }

    /// Remove a domain and every log it holds, files included
    ///
    /// Returns false if the domain was unknown. The domain stays in the map,
    /// flagged as removed, until its logs and persisted state are gone, so
    /// a publisher recreating it cannot have its new log or membership
    /// wiped by this removal.
    pub fn remove_domain(&self, domain: &DomainId) -> Result<bool> {
        let Some(domain_state) = self.domain(domain) else {
            return Ok(false);
        };

        let _guard = domain_state.create_lock.lock();
        if domain_state.is_removed() {
            return Ok(false);
        }
        domain_state.removed.store(true, Ordering::Release);

        let entries = domain_state.replicas();
        domain_state.replicas.clear();
        for entry in &entries {
            if let Err(e) = entry.log().destroy() {
                warn!(domain = %domain, replica_id = %entry.replica_id(), error = %e, "Failed to delete replica log");
            }
        }

        let cleared = self.state_store.clear_domain(domain);
        self.domains
            .remove_if(domain, |_, current| Arc::ptr_eq(current, &domain_state));
        self.subscriptions.publish(Notification::DomainRemoved {
            domain: domain.clone(),
        });
        info!(domain = %domain, logs = entries.len(), "Removed domain");
        cleared.map(|_| true)
    }

    /// Remove every domain and drop the persisted state
    pub fn clear_all(&self) -> Result<()> {
        for domain in self.domains() {
            self.remove_domain(&domain)?;
        }
        self.state_store.clear_all()
    }

    /// Close every log; later operations on them fail with `StoreUnavailable`
    pub fn close(&self) {
        for entry in self.all_replicas() {
            entry.log().close();
        }
    }

    /// Open a cursor over one replica log
    ///
    /// Never creates a log. A cursor on a replica without a log delivers
    /// nothing until the log is created, then reads it from `from`.
    pub fn open_replica_cursor(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        from: Option<&Csn>,
        options: CursorOptions,
    ) -> Result<ReplicaCursor> {
        if let Some(entry) = self.replica(domain, replica_id) {
            return ReplicaCursor::open(entry, from, options);
        }
        let subscription = self.subscriptions.subscribe(Scope::Replica {
            domain: domain.clone(),
            replica_id,
        });
        // the log may have been created before the subscription existed
        match self.replica(domain, replica_id) {
            Some(entry) => ReplicaCursor::open(entry, from, options),
            None => Ok(ReplicaCursor::waiting(replica_id, from, options, subscription)),
        }
    }

    /// Open a cursor merging every replica log of a domain
    ///
    /// The cursor follows logs created after it was opened.
    pub fn open_domain_cursor(
        &self,
        domain: &DomainId,
        from: &ServerState,
        options: CursorOptions,
    ) -> Result<DomainCursor> {
        // subscribe before the snapshot so no creation falls in between
        let subscription = self.subscriptions.subscribe(Scope::Domain(domain.clone()));
        let mut cursor = DomainCursor::new(domain.clone(), from.clone(), options);
        for entry in self.replicas(domain) {
            cursor.add_replica(entry)?;
        }
        cursor.attach(subscription);
        Ok(cursor)
    }

    /// Open a cursor merging every non-excluded domain
    ///
    /// The cursor follows domains and logs created after it was opened.
    pub fn open_multi_domain_cursor(
        &self,
        from: &MultiDomainServerState,
        options: CursorOptions,
        excluded: &BTreeSet<DomainId>,
    ) -> Result<MultiDomainCursor> {
        let subscription = self.subscriptions.subscribe(Scope::AllDomains {
            excluded: excluded.clone(),
        });
        let mut cursor = MultiDomainCursor::new(from.clone(), options, excluded.clone());
        for domain in self.domains() {
            if excluded.contains(&domain) {
                continue;
            }
            for entry in self.replicas(&domain) {
                cursor.add_replica(&domain, entry)?;
            }
        }
        cursor.attach(subscription);
        Ok(cursor)
    }

    /// Reject an offline CSN that does not belong to `replica_id`
    pub fn check_replica(replica_id: ReplicaId, csn: &Csn) -> Result<()> {
        if csn.replica_id() != replica_id {
            return Err(Error::InconsistentState(format!(
                "CSN {} was not generated by replica {}",
                csn, replica_id
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ReplicaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaRegistry")
            .field("domains", &self.domains())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
