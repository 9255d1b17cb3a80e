//! Audit-related error types.

use thiserror::Error;

/// Errors that can occur with audit logging.
#[derive(Debug, Error)]
pub enum AuditError {
    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(#[from] bulwark_storage::StorageError),

    /// An entry or the chain head could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A persisted entry is unreadable.
    #[error("corrupt audit entry at sequence {sequence}: {reason}")]
    CorruptEntry {
        /// Sequence number from the storage key.
        sequence: u64,
        /// What went wrong.
        reason: String,
    },

    /// Writing an export failed.
    #[error("export failed: {0}")]
    Export(#[from] std::io::Error),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] bulwark_crypto::CryptoError),
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;
