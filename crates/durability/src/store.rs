//! Changelog state store
//!
//! Small durable store of the facts needed to rebuild the replica registry
//! after a restart: known replicas, generation ids and offline markers.
//!
//! ## Journal
//!
//! Facts are appended to `<dir>/changelog.state` as CRC-framed
//! [`StateEntry`] records (see [`crate::journal`]). Every mutation is
//! written and synced before it is applied in memory, and a mutation that
//! would not change the state writes nothing.
//!
//! ## Load
//!
//! [`ChangelogStateStore::load`] replays the journal once at startup:
//! - a frame cut short at the end of the file (torn write) is dropped with a
//!   warning
//! - a frame failing its checksum anywhere else fails the load with
//!   `Corruption`
//!
//! The journal is then rewritten with one entry per live fact.
//!
//! An ephemeral store keeps the same semantics without touching the
//! filesystem.

use crate::entry::StateEntry;
use crate::journal::{self, Journal};
use crate::state::ChangelogState;
use changelog_core::{Csn, DomainId, Error, ReplicaId, Result};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Name of the journal file inside the data directory
pub const STATE_FILE_NAME: &str = "changelog.state";

/// Durable store of replica membership, generation ids and offline markers
pub struct ChangelogStateStore {
    path: Option<PathBuf>,
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    state: ChangelogState,
    journal: Option<Journal>,
    loaded: bool,
}

impl ChangelogStateStore {
    /// Open the store kept in `dir`, creating the directory if needed
    ///
    /// Nothing is read until [`load`](Self::load) is called.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: Some(dir.join(STATE_FILE_NAME)),
            inner: Mutex::new(StoreInner {
                state: ChangelogState::new(),
                journal: None,
                loaded: false,
            }),
        })
    }

    /// Create a store that keeps everything in memory
    pub fn ephemeral() -> Self {
        Self {
            path: None,
            inner: Mutex::new(StoreInner {
                state: ChangelogState::new(),
                journal: None,
                loaded: true,
            }),
        }
    }

    /// Path of the journal file, `None` for an ephemeral store
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Check if the store keeps nothing on disk
    pub fn is_ephemeral(&self) -> bool {
        self.path.is_none()
    }

    /// Replay the journal and return the recorded state
    ///
    /// Must be called before any mutation. Calling it again returns the
    /// current state without reading the journal.
    ///
    /// # Errors
    ///
    /// - `Corruption` if a complete frame fails validation
    /// - `Io` on filesystem errors
    pub fn load(&self) -> Result<ChangelogState> {
        let mut inner = self.inner.lock();
        if inner.loaded {
            return Ok(inner.state.clone());
        }
        let Some(path) = &self.path else {
            inner.loaded = true;
            return Ok(inner.state.clone());
        };

        let state: ChangelogState = journal::replay::<StateEntry>(path)?.iter().collect();
        journal::rewrite(path, &state.to_entries())?;
        let journal = Journal::open(path)?;

        info!(
            path = %path.display(),
            domains = state.domain_count(),
            "Loaded changelog state"
        );
        inner.state = state;
        inner.journal = Some(journal);
        inner.loaded = true;
        Ok(inner.state.clone())
    }

    /// Snapshot of the current state
    pub fn state(&self) -> ChangelogState {
        self.inner.lock().state.clone()
    }

    /// Record that `replica_id` is known in `domain`
    ///
    /// Also records `generation_id` when given. Recording a known replica
    /// is a no-op.
    pub fn record_replica(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        generation_id: Option<i64>,
    ) -> Result<()> {
        self.persist(StateEntry::Replica {
            domain: domain.clone(),
            replica_id,
        })?;
        if let Some(generation_id) = generation_id {
            self.record_generation_id(domain, generation_id)?;
        }
        Ok(())
    }

    /// Record the generation id of `domain`
    ///
    /// Returns true if it differs from the recorded one.
    pub fn record_generation_id(&self, domain: &DomainId, generation_id: i64) -> Result<bool> {
        self.persist(StateEntry::GenerationId {
            domain: domain.clone(),
            generation_id,
        })
    }

    /// Record that `replica_id` went offline at `csn`
    pub fn mark_offline(&self, domain: &DomainId, replica_id: ReplicaId, csn: Csn) -> Result<bool> {
        self.persist(StateEntry::Offline {
            domain: domain.clone(),
            replica_id,
            csn,
        })
    }

    /// Clear the offline marker of `replica_id`
    ///
    /// Marking an online replica online is a no-op.
    pub fn mark_online(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<bool> {
        self.persist(StateEntry::Online {
            domain: domain.clone(),
            replica_id,
        })
    }

    /// Drop every fact about `domain`
    pub fn clear_domain(&self, domain: &DomainId) -> Result<bool> {
        self.persist(StateEntry::ClearDomain {
            domain: domain.clone(),
        })
    }

    /// Drop every fact
    pub fn clear_all(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if let Some(journal) = inner.journal.as_mut() {
            journal.truncate()?;
        }
        inner.state = ChangelogState::new();
        info!("Cleared changelog state");
        Ok(())
    }

    fn persist(&self, entry: StateEntry) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.loaded {
            return Err(Error::InconsistentState(
                "changelog state store used before load".to_string(),
            ));
        }
        if !inner.state.changes(&entry) {
            return Ok(false);
        }

        if let Some(journal) = inner.journal.as_mut() {
            journal.append(&entry)?;
        }
        inner.state.apply(&entry);
        debug!(entry = entry.tag(), domain = %entry.domain(), "Recorded changelog state");
        Ok(true)
    }
}

impl std::fmt::Debug for ChangelogStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ChangelogStateStore")
            .field("path", &self.path)
            .field("loaded", &inner.loaded)
            .field("domains", &inner.state.domain_count())
            .finish()
    }
}
