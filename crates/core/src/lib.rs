//! Core types for the replication changelog
//!
//! This crate defines the vocabulary shared by every other changelog crate:
//! - [`Csn`]: the per-replica logical clock keying every update
//! - [`DomainId`] / [`ReplicaId`]: identity of a replicated naming context and
//!   of one server replicating it
//! - [`UpdateRecord`] / [`ChangeNumberRecord`]: the records stored by replica
//!   logs and the global change-number index
//! - [`ServerState`] / [`MultiDomainServerState`]: cursor start positions
//! - [`ChangelogCursor`]: the forward-only cursor contract
//! - [`Error`]: the error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod csn;
pub mod cursor;
pub mod error;
pub mod record;
pub mod server_state;
pub mod types;

pub use csn::Csn;
pub use cursor::{ChangelogCursor, CursorOptions, CursorState, KeyMatchingStrategy, PositionStrategy};
pub use error::{Error, Result};
pub use record::{ChangeNumberRecord, DomainUpdate, UpdateRecord};
pub use server_state::{MultiDomainServerState, ServerState};
pub use types::{DomainId, ReplicaId};
