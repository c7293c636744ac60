//! Changelog engine
//!
//! This crate ties the storage and durability layers together:
//! - ReplicaRegistry: lazily created replica logs per (domain, replica)
//! - SubscriptionRegistry: pushes newly created logs into live cursors
//! - ReplicaCursor / DomainCursor / MultiDomainCursor: cursor composition
//! - ChangeNumberIndexer: seam assigning global change numbers
//! - RetentionPurger: background retention of the index and replica logs
//! - ChangelogDb: the top-level changelog object
//!
//! # Example
//!
//! ```ignore
//! use changelog_engine::{ChangelogConfig, ChangelogDb};
//!
//! let db = ChangelogDb::open(ChangelogConfig::ephemeral())?;
//! db.publish_update(&domain, record)?;
//! let mut cursor = db.open_cursor_for_domain(&domain, &ServerState::new(), CursorOptions::default())?;
//! while cursor.next()? {
//!     handle(cursor.record());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod cursor;
pub mod db;
pub mod indexer;
pub mod purger;
pub mod registry;
pub mod subscription;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ChangelogConfig;
pub use cursor::{DomainCursor, MultiDomainCursor, ReplicaCursor};
pub use db::ChangelogDb;
pub use indexer::{ChangeNumberIndexer, SequentialIndexer};
pub use purger::{FatalHandler, PurgeOutcome, RetentionPurger};
pub use registry::{DomainState, Published, ReplicaEntry, ReplicaRegistry};
pub use subscription::{Notification, Scope, Subscription, SubscriptionRegistry};
