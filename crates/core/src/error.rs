//! Error types for the changelog
//!
//! ## Taxonomy
//!
//! | Variant | Meaning | Recovery |
//! |---------|---------|----------|
//! | StoreUnavailable | Store closed or being cleared concurrently | Retry with a fresh handle |
//! | InconsistentState | Invariant violation detected internally | Fatal for the affected store |
//! | Corruption | Persisted record failed validation | Fatal |
//! | ConfigurationRejected | Administrative request failed validation | No state changed |
//! | Io | Filesystem error | Depends on cause |
//! | Serialization | Record could not be encoded/decoded | Fatal for the record |

use thiserror::Error;

/// Result type alias for changelog operations
pub type Result<T> = std::result::Result<T, Error>;

/// Changelog errors
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying store is closed or mid-clear
    #[error("store unavailable: {store}")]
    StoreUnavailable {
        /// Name of the store
        store: String,
    },

    /// An internal invariant was violated
    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    /// A persisted record failed validation
    #[error("corruption at offset {offset}: {reason}")]
    Corruption {
        /// Byte offset of the bad record
        offset: u64,
        /// What failed
        reason: String,
    },

    /// An administrative request was rejected before any state changed
    #[error("configuration rejected: {0}")]
    ConfigurationRejected(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a store-unavailable error for the named store
    pub fn store_unavailable(store: impl Into<String>) -> Self {
        Error::StoreUnavailable {
            store: store.into(),
        }
    }

    /// Check if this error is transient
    ///
    /// Retrying against a freshly obtained handle may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StoreUnavailable { .. })
    }

    /// Check if this error must halt replication for the affected data
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InconsistentState(_) | Error::Corruption { .. })
    }
}
