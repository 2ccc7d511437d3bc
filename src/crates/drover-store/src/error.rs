//! Error types for the persistence ports

use thiserror::Error;

/// Convenience result type using [`StoreError`].
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by [`Store`](crate::Store) and
/// [`VectorStore`](crate::VectorStore) implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// No session with the given id exists.
    #[error("session '{0}' not found")]
    SessionNotFound(String),

    /// No checkpoint with the given id exists (or the session has none).
    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// No vector collection with the given name exists.
    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    /// An embedding's dimension does not match its collection.
    #[error("collection '{collection}' expects dimension {expected}, got {actual}")]
    DimensionMismatch {
        collection: String,
        expected: usize,
        actual: usize,
    },

    /// The store has been closed; no further operations are accepted.
    #[error("store is closed")]
    Closed,

    /// A record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure, wrapped with operation context.
    #[error("storage operation '{operation}' failed: {message}")]
    Backend { operation: String, message: String },
}

impl StoreError {
    /// Create a backend error with operation context.
    pub fn backend(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.into(),
            message: message.into(),
        }
    }
}
