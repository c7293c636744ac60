//! Convenient imports for the changelog.
//!
//! ```ignore
//! use changelogdb::prelude::*;
//!
//! let changelog = Changelog::ephemeral()?;
//! ```

// Main entry point
pub use crate::database::{Changelog, ChangelogBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Core types
pub use changelog_core::{Csn, DomainId, ReplicaId, UpdateRecord};

// Positions and cursors
pub use changelog_core::{
    ChangelogCursor, CursorOptions, CursorState, DomainUpdate, KeyMatchingStrategy,
    MultiDomainServerState, PositionStrategy, ServerState,
};

// Configuration
pub use changelog_engine::ChangelogConfig;
