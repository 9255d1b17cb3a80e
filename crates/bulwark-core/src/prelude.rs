//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bulwark_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{CoreError, CoreResult};

// Identifiers and time
pub use crate::{
    ActionId, CheckpointId, CorrelationId, GrantId, NodeId, PrincipalId, RequestId, Timestamp,
};

// Classifications
pub use crate::{DeploymentMode, IsolationType, RiskLevel, TrustLevel};

// Manifests
pub use crate::{ActionManifest, ManifestCeilings, ResourceLimits, ValidatedManifest};

// Retry
pub use crate::retry::{RetryConfig, RetryOutcome};
