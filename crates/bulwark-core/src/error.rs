//! Core error types.

use thiserror::Error;

/// Errors raised while validating core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A manifest failed structural validation.
    #[error("invalid manifest field {field}: {reason}")]
    InvalidManifest {
        /// The offending field.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A risk level outside 1..=5.
    #[error("risk level {0} is out of range (expected 1-5)")]
    InvalidRiskLevel(u8),

    /// An unknown enum label (trust level, isolation type).
    #[error("unknown {kind} '{value}'")]
    UnknownVariant {
        /// Which enum was being parsed.
        kind: &'static str,
        /// The rejected label.
        value: String,
    },
}

impl CoreError {
    pub(crate) fn manifest(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
