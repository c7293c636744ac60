//! In-memory changelog state
//!
//! `ChangelogState` is what the state store journal describes: for every
//! domain, its generation id, its known replicas and their offline
//! markers. It is rebuilt by replaying journal entries and is the input
//! used to pre-populate the replica registry at startup.

use crate::entry::StateEntry;
use changelog_core::{Csn, DomainId, ReplicaId};
use std::collections::{BTreeMap, BTreeSet};

/// Durable facts about one domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainRecord {
    /// Generation id, if one was ever recorded
    pub generation_id: Option<i64>,
    /// Known replicas
    pub replicas: BTreeSet<ReplicaId>,
    /// Offline markers: replica -> CSN at which it went offline
    pub offline: BTreeMap<ReplicaId, Csn>,
}

impl DomainRecord {
    /// Offline CSN of a replica
    pub fn offline_csn(&self, replica_id: ReplicaId) -> Option<Csn> {
        self.offline.get(&replica_id).copied()
    }

    fn is_empty(&self) -> bool {
        self.generation_id.is_none() && self.replicas.is_empty() && self.offline.is_empty()
    }
}

/// Durable facts about every domain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangelogState {
    domains: BTreeMap<DomainId, DomainRecord>,
}

impl ChangelogState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts about one domain
    pub fn domain(&self, domain: &DomainId) -> Option<&DomainRecord> {
        self.domains.get(domain)
    }

    /// Iterate over domains in order
    pub fn domains(&self) -> impl Iterator<Item = (&DomainId, &DomainRecord)> {
        self.domains.iter()
    }

    /// Number of domains
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Check if no fact is recorded
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Whether applying `entry` would change the state
    pub fn changes(&self, entry: &StateEntry) -> bool {
        let record = self.domains.get(entry.domain());
        match entry {
            StateEntry::Replica { replica_id, .. } => {
                !record.map(|r| r.replicas.contains(replica_id)).unwrap_or(false)
            }
            StateEntry::GenerationId { generation_id, .. } => {
                record.and_then(|r| r.generation_id) != Some(*generation_id)
            }
            StateEntry::Offline {
                replica_id, csn, ..
            } => record.and_then(|r| r.offline_csn(*replica_id)) != Some(*csn),
            StateEntry::Online { replica_id, .. } => record
                .map(|r| r.offline.contains_key(replica_id))
                .unwrap_or(false),
            StateEntry::ClearDomain { .. } => record.is_some(),
        }
    }

    /// Apply one entry
    ///
    /// Returns true if the state changed.
    pub fn apply(&mut self, entry: &StateEntry) -> bool {
        if !self.changes(entry) {
            return false;
        }
        match entry {
            StateEntry::Replica { domain, replica_id } => {
                self.record_mut(domain).replicas.insert(*replica_id);
            }
            StateEntry::GenerationId {
                domain,
                generation_id,
            } => {
                self.record_mut(domain).generation_id = Some(*generation_id);
            }
            StateEntry::Offline {
                domain,
                replica_id,
                csn,
            } => {
                self.record_mut(domain).offline.insert(*replica_id, *csn);
            }
            StateEntry::Online { domain, replica_id } => {
                let now_empty = match self.domains.get_mut(domain) {
                    Some(record) => {
                        record.offline.remove(replica_id);
                        record.is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    self.domains.remove(domain);
                }
            }
            StateEntry::ClearDomain { domain } => {
                self.domains.remove(domain);
            }
        }
        true
    }

    /// Minimal entry sequence rebuilding this state
    pub fn to_entries(&self) -> Vec<StateEntry> {
        let mut entries = Vec::new();
        for (domain, record) in &self.domains {
            if let Some(generation_id) = record.generation_id {
                entries.push(StateEntry::GenerationId {
                    domain: domain.clone(),
                    generation_id,
                });
            }
            for replica_id in &record.replicas {
                entries.push(StateEntry::Replica {
                    domain: domain.clone(),
                    replica_id: *replica_id,
                });
            }
            for (replica_id, csn) in &record.offline {
                entries.push(StateEntry::Offline {
                    domain: domain.clone(),
                    replica_id: *replica_id,
                    csn: *csn,
                });
            }
        }
        entries
    }

    fn record_mut(&mut self, domain: &DomainId) -> &mut DomainRecord {
        self.domains.entry(domain.clone()).or_default()
    }
}

impl<'a> FromIterator<&'a StateEntry> for ChangelogState {
    fn from_iter<I: IntoIterator<Item = &'a StateEntry>>(iter: I) -> Self {
        let mut state = ChangelogState::new();
        for entry in iter {
            state.apply(entry);
        }
        state
    }
}
