//! Storage error types.

/// Errors from a [`KvStore`](crate::KvStore) backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The backend rejected or failed a read, write or transaction.
    #[error("kv backend error: {0}")]
    Internal(String),

    /// The backing directory could not be opened or closed.
    #[error("failed to open kv store: {0}")]
    Connection(String),

    /// A stored value did not round-trip through JSON.
    #[error("malformed stored value: {0}")]
    Serialization(String),

    /// A namespace or key contains a reserved byte or is empty.
    #[error("invalid namespace or key: {0}")]
    InvalidKey(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
