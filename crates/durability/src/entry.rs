//! Changelog state journal entries
//!
//! Each entry records one fact about the replicated domains:
//! - Replica: a (domain, replica) pair is known
//! - GenerationId: the generation id of a domain
//! - Offline: a replica announced it went offline at a CSN
//! - Online: a replica's offline marker was cleared
//! - ClearDomain: every fact about a domain was dropped
//!
//! Replaying the entries in order rebuilds the
//! [`ChangelogState`](crate::ChangelogState).

use changelog_core::{Csn, DomainId, ReplicaId};
use serde::{Deserialize, Serialize};

/// Journal entry of the changelog state store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateEntry {
    /// Replica membership
    Replica {
        /// Domain of the replica
        domain: DomainId,
        /// Replica now known in the domain
        replica_id: ReplicaId,
    },

    /// Generation id of a domain
    ///
    /// Replaces any previous generation id of the domain.
    GenerationId {
        /// Domain
        domain: DomainId,
        /// New generation id
        generation_id: i64,
    },

    /// Offline marker
    Offline {
        /// Domain of the replica
        domain: DomainId,
        /// Replica that went offline
        replica_id: ReplicaId,
        /// CSN at which it went offline
        csn: Csn,
    },

    /// Offline marker cleared
    Online {
        /// Domain of the replica
        domain: DomainId,
        /// Replica back online
        replica_id: ReplicaId,
    },

    /// Every fact about a domain dropped
    ClearDomain {
        /// Domain removed
        domain: DomainId,
    },
}

impl StateEntry {
    /// Domain the entry is about
    pub fn domain(&self) -> &DomainId {
        match self {
            StateEntry::Replica { domain, .. }
            | StateEntry::GenerationId { domain, .. }
            | StateEntry::Offline { domain, .. }
            | StateEntry::Online { domain, .. }
            | StateEntry::ClearDomain { domain } => domain,
        }
    }

    /// Short tag used in logs
    pub fn tag(&self) -> &'static str {
        match self {
            StateEntry::Replica { .. } => "replica",
            StateEntry::GenerationId { .. } => "generation-id",
            StateEntry::Offline { .. } => "offline",
            StateEntry::Online { .. } => "online",
            StateEntry::ClearDomain { .. } => "clear-domain",
        }
    }
}
