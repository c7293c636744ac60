//! Cursor contract and positioning options
//!
//! Every changelog cursor is a stateful, forward-only iterator with an
//! explicit "nothing more right now" state:
//!
//! ```text
//! Uninitialized --next()--> Positioned(record) --next()--> Exhausted
//!                                 ^                           |
//!                                 +-------- next() ----------+  (after more appends)
//! ```
//!
//! `Exhausted` only describes the data known at the time of the call. A
//! later `next()` moves the cursor back to `Positioned` once more records
//! have been appended. Cursors never block waiting for data.

use crate::csn::Csn;
use crate::error::Result;
use serde::{Deserialize, Serialize};

/// How a start key is matched against the stored keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyMatchingStrategy {
    /// Only the record with exactly this key matches
    ///
    /// If no such record exists the cursor is empty.
    EqualToKey,
    /// The newest record whose key is lower than or equal to the key
    ///
    /// If every record is newer than the key the cursor starts from the
    /// first record.
    LessThanOrEqualToKey,
    /// The oldest record whose key is greater than or equal to the key
    ///
    /// If no such record exists yet, the cursor delivers the first record
    /// appended later with a matching key.
    GreaterThanOrEqualToKey,
}

/// Where the cursor is positioned relative to the matched record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionStrategy {
    /// The first `next()` returns the matched record
    OnMatchingKey,
    /// The first `next()` returns the record following the matched one
    AfterMatchingKey,
}

/// Options used to open a cursor from a start key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorOptions {
    /// Key matching strategy
    pub matching: KeyMatchingStrategy,
    /// Position strategy
    pub position: PositionStrategy,
}

impl CursorOptions {
    /// Create cursor options
    pub const fn new(matching: KeyMatchingStrategy, position: PositionStrategy) -> Self {
        Self { matching, position }
    }

    /// Options positioning exactly on the start key
    pub const fn exact() -> Self {
        Self::new(KeyMatchingStrategy::EqualToKey, PositionStrategy::OnMatchingKey)
    }
}

impl Default for CursorOptions {
    /// Resume after the last seen key: the start key is the last record the
    /// consumer already received.
    fn default() -> Self {
        Self::new(
            KeyMatchingStrategy::GreaterThanOrEqualToKey,
            PositionStrategy::AfterMatchingKey,
        )
    }
}

/// Observable state of a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// `next()` was never called
    Uninitialized,
    /// The cursor holds a current record
    Positioned,
    /// No record is available right now
    Exhausted,
    /// The replica announced it went offline at this CSN and every record
    /// older than it has been delivered
    ReplicaOffline(Csn),
    /// The cursor was released
    Closed,
}

impl CursorState {
    /// Whether the cursor currently holds a record
    pub fn is_positioned(&self) -> bool {
        matches!(self, CursorState::Positioned)
    }
}

/// A forward-only changelog cursor
///
/// # Contract
///
/// - `next()` returns `Ok(true)` when the cursor moved onto a new record,
///   available through `record()`, and `Ok(false)` when nothing is
///   available right now. It never blocks waiting for data.
/// - `close()` releases the cursor. Dropping a cursor releases it as well.
///   A closed cursor always returns `Ok(false)`.
pub trait ChangelogCursor {
    /// Type of record delivered
    type Record;

    /// Advance to the next available record
    fn next(&mut self) -> Result<bool>;

    /// Current record, if positioned
    fn record(&self) -> Option<&Self::Record>;

    /// Current state
    fn state(&self) -> CursorState;

    /// Release the cursor
    fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_resume_after_key() {
        let options = CursorOptions::default();
        assert_eq!(options.matching, KeyMatchingStrategy::GreaterThanOrEqualToKey);
        assert_eq!(options.position, PositionStrategy::AfterMatchingKey);
    }

    #[test]
    fn test_exact_options() {
        let options = CursorOptions::exact();
        assert_eq!(options.matching, KeyMatchingStrategy::EqualToKey);
        assert_eq!(options.position, PositionStrategy::OnMatchingKey);
    }

    #[test]
    fn test_trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn ChangelogCursor<Record = u64>) {}
    }

    #[test]
    fn test_state_is_positioned() {
        assert!(CursorState::Positioned.is_positioned());
        assert!(!CursorState::Exhausted.is_positioned());
    }
}
