//! Capability-related error types.

use thiserror::Error;

/// Errors from capability parsing and registry administration.
///
/// Note that a failed [`check`](crate::CapabilityRegistry::check) is not an
/// error: it is a plain `false`.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The capability text could not be parsed.
    #[error("invalid capability pattern: {pattern} - {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A zero TTL was requested.
    #[error("grant ttl must be greater than zero")]
    InvalidTtl,

    /// No live grant has this id.
    #[error("grant not found: {grant_id}")]
    GrantNotFound {
        /// The grant id that was looked up.
        grant_id: String,
    },

    /// The grant was already revoked or swept.
    #[error("grant already revoked: {grant_id}")]
    AlreadyRevoked {
        /// The revoked grant id.
        grant_id: String,
    },

    /// The backing store failed.
    #[error("storage error: {0}")]
    Storage(#[from] bulwark_storage::StorageError),

    /// A persisted record could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl CapabilityError {
    pub(crate) fn pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type for capability operations.
pub type CapabilityResult<T> = Result<T, CapabilityError>;
