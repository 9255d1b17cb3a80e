//! Approval error types.

use crate::request::ApprovalStatus;

/// Errors from the approval gate.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    /// No request has this id.
    #[error("approval request not found: {request_id}")]
    NotFound {
        /// The id that was looked up.
        request_id: String,
    },

    /// The request already reached a terminal state. The first resolution
    /// stands; this one was discarded.
    #[error("approval request {request_id} already resolved as {status}")]
    AlreadyResolved {
        /// The request id.
        request_id: String,
        /// The terminal status that won.
        status: ApprovalStatus,
    },

    /// The gate is shutting down and accepts no new requests.
    #[error("approval gate is closed")]
    Closed,

    /// The policy is inconsistent.
    #[error("invalid risk policy: {0}")]
    InvalidPolicy(String),

    /// Archiving a resolved request failed.
    #[error("storage error: {0}")]
    Storage(#[from] bulwark_storage::StorageError),
}

impl ApprovalError {
    /// Whether this is a resolution conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::AlreadyResolved { .. })
    }
}

/// Result type for approval operations.
pub type ApprovalResult<T> = Result<T, ApprovalError>;
