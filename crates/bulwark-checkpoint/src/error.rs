//! Checkpoint error types.

use std::path::PathBuf;

use bulwark_capabilities::ResourceClass;

/// Errors from checkpoint creation, restore and commit.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Another action holds an overlapping scope and did not release it in
    /// time.
    #[error("timed out after {waited_ms}ms waiting for scope lock on {scope}")]
    LockTimeout {
        /// The scope that was requested.
        scope: String,
        /// How long acquisition waited.
        waited_ms: u64,
    },

    /// The scope cannot be bounded (e.g. the whole filesystem).
    #[error("scope too broad to snapshot: {entry}")]
    ScopeTooBroad {
        /// The offending scope entry.
        entry: String,
    },

    /// No state backend handles this resource class.
    #[error("no state store for resource class {class}")]
    Unsupported {
        /// The resource class.
        class: ResourceClass,
    },

    /// The snapshot would exceed the configured size ceiling.
    #[error("snapshot of {entry} exceeds {limit} bytes")]
    SnapshotTooLarge {
        /// The scope entry being captured.
        entry: String,
        /// The ceiling in bytes.
        limit: u64,
    },

    /// No checkpoint has this id.
    #[error("checkpoint not found: {checkpoint_id}")]
    NotFound {
        /// The id that was looked up.
        checkpoint_id: String,
    },

    /// The caller does not own the checkpoint.
    #[error("checkpoint {checkpoint_id} belongs to {owner}, not {caller}")]
    PrincipalMismatch {
        /// The checkpoint id.
        checkpoint_id: String,
        /// The principal that created it.
        owner: String,
        /// The principal that asked to restore it.
        caller: String,
    },

    /// The stored snapshot does not match its integrity hash.
    #[error("checkpoint {checkpoint_id} failed integrity verification")]
    IntegrityMismatch {
        /// The checkpoint id.
        checkpoint_id: String,
    },

    /// Filesystem access failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Persisting or loading a checkpoint failed.
    #[error("storage error: {0}")]
    Storage(#[from] bulwark_storage::StorageError),

    /// A snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A blocking snapshot task panicked or was cancelled.
    #[error("snapshot task failed: {0}")]
    Task(String),
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;
