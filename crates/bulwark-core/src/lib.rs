//! Bulwark Core - shared types for the agent execution gate.
//!
//! This crate provides:
//! - Identifier newtypes (actions, grants, checkpoints, approval requests)
//! - [`Timestamp`] used by every time-bearing record
//! - [`RiskLevel`], [`TrustLevel`] and [`IsolationType`] classifications
//! - [`ActionManifest`] with structural validation against [`ManifestCeilings`]
//! - Retry with exponential backoff for bounded isolation-spawn retries
//!
//! # Example
//!
//! ```
//! use bulwark_core::{ActionManifest, IsolationType, ManifestCeilings, TrustLevel};
//!
//! let manifest = ActionManifest::builder("summarise-notes")
//!     .capability("fs:read:/workspace/**")
//!     .risk_level(2)
//!     .trust_level(TrustLevel::Verified)
//!     .isolation(IsolationType::Subprocess)
//!     .build();
//!
//! let validated = manifest.validate(&ManifestCeilings::default()).unwrap();
//! assert_eq!(validated.risk_level().get(), 2);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;
pub mod retry;

mod error;
mod level;
mod manifest;
mod types;

pub use error::{CoreError, CoreResult};
pub use level::{DeploymentMode, IsolationType, RiskLevel, TrustLevel};
pub use manifest::{
    ActionManifest, MAX_NAME_LEN, MAX_REQUIRED_CAPABILITIES, ManifestBuilder, ManifestCeilings,
    ResourceLimits, ValidatedManifest,
};
pub use types::{
    ActionId, CheckpointId, CorrelationId, GrantId, NodeId, PrincipalId, RequestId, Timestamp,
};
