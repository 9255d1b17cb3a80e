//! Isolation error types.

use bulwark_core::IsolationType;
use serde::{Deserialize, Serialize};

/// The action itself failed inside its boundary.
///
/// Faults are reported to the caller and trigger rollback; they are never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionFault {
    /// The action returned an error or exited unsuccessfully.
    #[error("action failed: {detail}")]
    Failed {
        /// What the action reported.
        detail: String,
        /// Exit code, for process boundaries.
        exit_code: Option<i32>,
    },

    /// The wall-clock limit elapsed and the boundary was terminated.
    #[error("wall-clock limit of {limit_secs}s exceeded")]
    Timeout {
        /// The limit that was breached.
        limit_secs: u64,
    },

    /// A cpu or memory ceiling was breached and the boundary was
    /// terminated.
    #[error("{resource} limit exceeded")]
    LimitExceeded {
        /// `cpu` or `memory`.
        resource: String,
    },
}

impl ExecutionFault {
    /// Short tag for audit records.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Timeout { .. } => "timeout",
            Self::LimitExceeded { .. } => "limit_exceeded",
        }
    }
}

/// Errors from selecting, spawning or running a boundary.
#[derive(Debug, thiserror::Error)]
pub enum IsolationError {
    /// The boundary could not be created. Retried with backoff.
    #[error("failed to spawn {boundary} boundary: {reason}")]
    SpawnFailed {
        /// Which boundary.
        boundary: IsolationType,
        /// Why.
        reason: String,
    },

    /// No container runtime is installed.
    #[error("container runtime not found: {0}")]
    RuntimeUnavailable(String),

    /// An in-process action cannot be hosted by a stronger boundary.
    #[error("in-process action cannot run inside a {boundary} boundary")]
    Unhostable {
        /// The boundary that was required.
        boundary: IsolationType,
    },

    /// A container boundary was required but the command names no image.
    #[error("container boundary requires an image")]
    MissingImage,

    /// The action ran and failed.
    #[error(transparent)]
    Fault(#[from] ExecutionFault),

    /// The caller cancelled the action and the boundary was terminated.
    #[error("execution cancelled")]
    Cancelled,
}

impl IsolationError {
    pub(crate) fn spawn(boundary: IsolationType, reason: impl std::fmt::Display) -> Self {
        Self::SpawnFailed {
            boundary,
            reason: reason.to_string(),
        }
    }

    /// Whether a fresh spawn attempt might succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::SpawnFailed { .. })
    }
}

/// Result type for isolation operations.
pub type IsolationResult<T> = Result<T, IsolationError>;
