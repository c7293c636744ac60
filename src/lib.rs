//! # changelogdb
//!
//! Changelog storage for multi-master directory replication.
//!
//! Every update accepted for a replicated naming context ("domain") is
//! recorded in the log of the replica that generated it, keyed by its CSN.
//! Replicas resume from exactly where they stopped, and a global change
//! number orders updates across all domains.
//!
//! ## Quick Start
//!
//! ```ignore
//! use changelogdb::prelude::*;
//!
//! let changelog = Changelog::open("./changelog")?;
//!
//! let domain = DomainId::new("dc=example,dc=com");
//! changelog.publish_update(&domain, UpdateRecord::new(Csn::new(now, 0, ReplicaId(1)), payload))?;
//!
//! let mut cursor =
//!     changelog.open_cursor_for_domain(&domain, &ServerState::new(), CursorOptions::default())?;
//! while cursor.next()? {
//!     let record = cursor.record();
//! }
//! ```
//!
//! ## Cursors
//!
//! - [`ReplicaCursor`] - one replica log, stopping at the replica's offline CSN
//! - [`DomainCursor`] - every replica of a domain, merged by CSN
//! - [`MultiDomainCursor`] - every domain, merged by CSN
//!
//! Domain and cross-domain cursors pick up replica logs created after they
//! were opened. `next()` never blocks: it returns `false` when nothing is
//! available right now.
//!
//! ## Retention
//!
//! A background thread purges records older than the purge delay, always
//! purging the change-number index before the replica logs.

#![warn(missing_docs)]

mod database;
mod error;

pub mod prelude;

// Re-export main entry points
pub use database::{Changelog, ChangelogBuilder};
pub use error::{Error, Result};

// Re-export core types
pub use changelog_core::{
    ChangeNumberRecord, ChangelogCursor, Csn, CursorOptions, CursorState, DomainId, DomainUpdate,
    KeyMatchingStrategy, MultiDomainServerState, PositionStrategy, ReplicaId, ServerState,
    UpdateRecord,
};

// Re-export engine types
pub use changelog_engine::{
    ChangelogConfig, Clock, DomainCursor, ManualClock, MultiDomainCursor, PurgeOutcome,
    ReplicaCursor, SystemClock,
};
