//! Durability layer for the changelog
//!
//! This crate persists what the changelog needs after a restart:
//! - Frame encoding/decoding with CRC32 checksums
//! - Journal: append-only files of framed records, replayed and compacted
//!   at startup (replica logs and the change-number index use it too)
//! - StateEntry: state journal records (replica membership, generation ids,
//!   offline markers, domain removal)
//! - ChangelogState: the in-memory view rebuilt by replaying the journal
//! - ChangelogStateStore: file-backed or ephemeral store, compacted on load

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod entry;
pub mod journal;
pub mod state;
pub mod store;

pub use encoding::{
    decode_entry, decode_frame, encode_entry, encode_frame, FRAME_HEADER_LEN, MAX_ENTRY_LEN,
};
pub use entry::StateEntry;
pub use journal::Journal;
pub use state::{ChangelogState, DomainRecord};
pub use store::{ChangelogStateStore, STATE_FILE_NAME};
