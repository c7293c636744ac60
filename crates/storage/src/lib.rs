//! Storage layer for the changelog
//!
//! This crate implements the ordered stores backing the changelog:
//! - OrderedStore: BTreeMap-based append-only store guarded by a lifecycle RwLock,
//!   optionally journaled to a file
//! - StoreCursor: forward cursor over an OrderedStore
//! - ReplicaLog: updates of one (domain, replica) pair keyed by CSN
//! - ChangeNumberIndex: global change number -> (domain, CSN) index

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod change_number_index;
pub mod ordered;
pub mod replica_log;

pub use change_number_index::ChangeNumberIndex;
pub use ordered::{OrderedStore, StoreCursor, StoreItem};
pub use replica_log::ReplicaLog;
