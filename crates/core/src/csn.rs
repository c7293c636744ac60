//! Change sequence numbers (CSN)
//!
//! A CSN is the logical clock attached to every update. It is made of the
//! wall-clock time (milliseconds) at which the update was generated, a
//! counter disambiguating updates generated in the same millisecond, and
//! the id of the replica that generated it.
//!
//! CSNs are totally ordered by `(time, seq)` with the replica id as final
//! tie-break. For a given replica they strictly increase.
//!
//! ## Text form
//!
//! The canonical text form is 28 hex digits: 16 for the time, 4 for the
//! replica id and 8 for the counter, e.g. `0000018f3a2b1c4d00070000002a`.

use crate::error::{Error, Result};
use crate::types::ReplicaId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Length of the canonical hex representation
pub const CSN_STRING_LEN: usize = 28;

/// Change sequence number: the logical clock of one update
///
/// # Examples
///
/// ```
/// use changelog_core::{Csn, ReplicaId};
///
/// let a = Csn::new(100, 0, ReplicaId(1));
/// let b = Csn::new(200, 0, ReplicaId(2));
/// assert!(a < b);
/// assert_eq!(a.to_string().parse::<Csn>().unwrap(), a);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Csn {
    time_ms: u64,
    seq: u32,
    replica_id: ReplicaId,
}

impl Csn {
    /// Create a CSN
    pub const fn new(time_ms: u64, seq: u32, replica_id: ReplicaId) -> Self {
        Csn {
            time_ms,
            seq,
            replica_id,
        }
    }

    /// The smallest CSN that can be generated at `time_ms`
    ///
    /// Every CSN generated at or after `time_ms` compares greater than or
    /// equal to it, which makes it the natural purge floor for a timestamp.
    pub const fn floor_at(time_ms: u64) -> Self {
        Csn::new(time_ms, 0, ReplicaId(0))
    }

    /// Wall-clock time in milliseconds since the Unix epoch
    #[inline]
    pub fn time_ms(&self) -> u64 {
        self.time_ms
    }

    /// Counter within the millisecond
    #[inline]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Replica that generated the update
    #[inline]
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Whether this CSN was generated strictly before `other`
    #[inline]
    pub fn is_older_than(&self, other: &Csn) -> bool {
        self < other
    }

    /// Whether this CSN was generated strictly after `other`
    #[inline]
    pub fn is_newer_than(&self, other: &Csn) -> bool {
        self > other
    }
}

impl Ord for Csn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time_ms
            .cmp(&other.time_ms)
            .then(self.seq.cmp(&other.seq))
            .then(self.replica_id.cmp(&other.replica_id))
    }
}

impl PartialOrd for Csn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Csn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:016x}{:04x}{:08x}",
            self.time_ms, self.replica_id.0, self.seq
        )
    }
}

impl FromStr for Csn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != CSN_STRING_LEN || !s.is_ascii() {
            return Err(Error::InconsistentState(format!(
                "malformed CSN '{}': expected {} hex digits",
                s, CSN_STRING_LEN
            )));
        }
        let malformed = |_| Error::InconsistentState(format!("malformed CSN '{}'", s));
        let time_ms = u64::from_str_radix(&s[0..16], 16).map_err(malformed)?;
        let replica_id = u16::from_str_radix(&s[16..20], 16).map_err(malformed)?;
        let seq = u32::from_str_radix(&s[20..28], 16).map_err(malformed)?;
        Ok(Csn::new(time_ms, seq, ReplicaId(replica_id)))
    }
}
