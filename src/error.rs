//! Error types for draft-sync.

use thiserror::Error;

/// Errors raised by a [`BackingStore`](crate::storage::BackingStore).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The underlying database rejected the operation.
    #[error("database error: {0}")]
    Database(String),

    /// A value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The store is temporarily unable to accept writes.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Main error type for draft-sync.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A sync was requested while the connectivity signal is offline.
    #[error("cannot sync while offline")]
    Offline,

    /// The key is the one the queue snapshot is persisted under.
    #[error("key {0:?} is reserved for the queue snapshot")]
    ReservedKey(String),

    /// Backing store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Local database error.
    #[error("database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}
