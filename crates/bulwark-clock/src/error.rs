//! Clock error types.

use bulwark_core::NodeId;
use thiserror::Error;

/// Errors from the clock service.
#[derive(Debug, Error)]
pub enum ClockError {
    /// A remote timestamp is further ahead of local time than allowed.
    #[error("timestamp from {node} is {drift_ms}ms ahead of local time (max {max_ms}ms)")]
    ExcessiveDrift {
        /// The reporting node.
        node: NodeId,
        /// Observed forward drift after normalization.
        drift_ms: i64,
        /// Configured limit.
        max_ms: i64,
    },
}

/// Result type for clock operations.
pub type ClockResult<T> = Result<T, ClockError>;
