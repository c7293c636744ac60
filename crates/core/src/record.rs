//! Records stored by the changelog
//!
//! - [`UpdateRecord`]: one replicated update, stored in a replica log
//! - [`ChangeNumberRecord`]: one entry of the global change-number index
//! - [`DomainUpdate`]: an update tagged with its domain, produced by
//!   cross-domain cursors

use crate::csn::Csn;
use crate::types::{DomainId, ReplicaId};
use serde::{Deserialize, Serialize};

/// One replicated update
///
/// The payload is opaque: the changelog never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateRecord {
    /// Logical clock of the update
    pub csn: Csn,
    /// Encoded update, as received from the replication protocol
    pub payload: Vec<u8>,
}

impl UpdateRecord {
    /// Create an update record
    pub fn new(csn: Csn, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            csn,
            payload: payload.into(),
        }
    }

    /// Replica that generated the update
    #[inline]
    pub fn replica_id(&self) -> ReplicaId {
        self.csn.replica_id()
    }
}

/// Entry of the global change-number index
///
/// Correlates a server-wide sequence number with the update it designates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNumberRecord {
    /// Server-wide monotonic sequence number
    pub change_number: u64,
    /// Domain the update belongs to
    pub domain: DomainId,
    /// Logical clock of the update
    pub csn: Csn,
}

impl ChangeNumberRecord {
    /// Create a change-number record
    pub fn new(change_number: u64, domain: DomainId, csn: Csn) -> Self {
        Self {
            change_number,
            domain,
            csn,
        }
    }
}

/// An update tagged with the domain it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainUpdate {
    /// Domain of the update
    pub domain: DomainId,
    /// The update itself
    pub record: UpdateRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_record_replica_id() {
        let record = UpdateRecord::new(Csn::new(10, 0, ReplicaId(3)), b"op".to_vec());
        assert_eq!(record.replica_id(), ReplicaId(3));
        assert_eq!(record.payload, b"op");
    }

    #[test]
    fn test_change_number_record_fields() {
        let csn = Csn::new(10, 0, ReplicaId(3));
        let record = ChangeNumberRecord::new(5, DomainId::new("o=test"), csn);
        assert_eq!(record.change_number, 5);
        assert_eq!(record.domain.as_str(), "o=test");
        assert_eq!(record.csn, csn);
    }
}
