//! Unified error types for the changelog.
//!
//! This module provides a stable error type that wraps the errors of the
//! internal crates.

use thiserror::Error;

/// All changelog errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A store is closed or being cleared; retry with a fresh handle
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// An internal invariant was violated; replication for the affected
    /// data must stop
    #[error("inconsistent state: {0}")]
    Inconsistent(String),

    /// Persisted changelog state failed validation
    #[error("corruption at offset {offset}: {reason}")]
    Corruption {
        /// Byte offset of the bad record
        offset: u64,
        /// What failed
        reason: String,
    },

    /// A request was rejected before anything changed
    #[error("rejected: {0}")]
    Rejected(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type for changelog operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Retrying against a freshly obtained handle may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unavailable(_))
    }

    /// Check if this error must halt replication.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Inconsistent(_) | Error::Corruption { .. })
    }

    /// Check if this is a rejected request.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }
}

// Convert from internal core errors
impl From<changelog_core::Error> for Error {
    fn from(e: changelog_core::Error) -> Self {
        use changelog_core::Error as CoreError;
        match e {
            CoreError::StoreUnavailable { store } => Error::Unavailable(store),
            CoreError::InconsistentState(msg) => Error::Inconsistent(msg),
            CoreError::Corruption { offset, reason } => Error::Corruption { offset, reason },
            CoreError::ConfigurationRejected(msg) => Error::Rejected(msg),
            CoreError::Io(io_err) => Error::Io(io_err),
            CoreError::Serialization(msg) => Error::Serialization(msg),
        }
    }
}
