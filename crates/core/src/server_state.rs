//! Replication positions
//!
//! A [`ServerState`] records, for each replica of one domain, the CSN of the
//! newest update seen from that replica. A [`MultiDomainServerState`] does
//! the same across domains. Both are used as cursor start positions and are
//! returned by cursors so consumers can resume where they stopped.

use crate::csn::Csn;
use crate::types::{DomainId, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Newest CSN seen per replica of one domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    csns: BTreeMap<ReplicaId, Csn>,
}

impl ServerState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `csn` for its replica if it is newer than what is known
    ///
    /// Returns true if the state changed.
    pub fn update(&mut self, csn: Csn) -> bool {
        match self.csns.get(&csn.replica_id()) {
            Some(known) if *known >= csn => false,
            _ => {
                self.csns.insert(csn.replica_id(), csn);
                true
            }
        }
    }

    /// Newest CSN known for `replica_id`
    pub fn get(&self, replica_id: ReplicaId) -> Option<Csn> {
        self.csns.get(&replica_id).copied()
    }

    /// Whether `csn` is already covered (seen or older than seen)
    pub fn covers(&self, csn: &Csn) -> bool {
        self.get(csn.replica_id())
            .map(|known| *csn <= known)
            .unwrap_or(false)
    }

    /// Forget the position of a replica
    pub fn remove(&mut self, replica_id: ReplicaId) -> Option<Csn> {
        self.csns.remove(&replica_id)
    }

    /// Replica ids present in the state, in ascending order
    pub fn replica_ids(&self) -> impl Iterator<Item = ReplicaId> + '_ {
        self.csns.keys().copied()
    }

    /// Iterate over `(replica, csn)` pairs in replica order
    pub fn iter(&self) -> impl Iterator<Item = (ReplicaId, Csn)> + '_ {
        self.csns.iter().map(|(r, c)| (*r, *c))
    }

    /// Number of replicas in the state
    pub fn len(&self) -> usize {
        self.csns.len()
    }

    /// Check if the state is empty
    pub fn is_empty(&self) -> bool {
        self.csns.is_empty()
    }
}

impl FromIterator<Csn> for ServerState {
    fn from_iter<I: IntoIterator<Item = Csn>>(iter: I) -> Self {
        let mut state = ServerState::new();
        for csn in iter {
            state.update(csn);
        }
        state
    }
}

/// [`ServerState`] per domain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiDomainServerState {
    domains: BTreeMap<DomainId, ServerState>,
}

impl MultiDomainServerState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `csn` for `domain`; returns true if the state changed
    pub fn update(&mut self, domain: &DomainId, csn: Csn) -> bool {
        self.domains.entry(domain.clone()).or_default().update(csn)
    }

    /// Replace the whole state of one domain
    pub fn set(&mut self, domain: DomainId, state: ServerState) {
        self.domains.insert(domain, state);
    }

    /// State of one domain
    pub fn get(&self, domain: &DomainId) -> Option<&ServerState> {
        self.domains.get(domain)
    }

    /// Forget the state of one domain
    pub fn remove(&mut self, domain: &DomainId) -> Option<ServerState> {
        self.domains.remove(domain)
    }

    /// Iterate over domains in order
    pub fn iter(&self) -> impl Iterator<Item = (&DomainId, &ServerState)> {
        self.domains.iter()
    }

    /// Check if no domain has a position
    pub fn is_empty(&self) -> bool {
        self.domains.values().all(ServerState::is_empty)
    }
}
