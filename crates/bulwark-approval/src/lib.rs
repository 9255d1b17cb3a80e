//! Bulwark Approval - human-in-the-loop gating for risky actions.
//!
//! This crate provides:
//! - [`RiskPolicy`]: approval threshold, checkpoint floor and approval
//!   window, with presets per deployment mode
//! - [`ApprovalGate`]: per-request state machine
//!   `pending -> {approved, denied, expired}` with suspension by message
//!   passing rather than polling
//!
//! # Resolution rules
//!
//! - Below the threshold, [`ApprovalGate::submit`] auto-approves
//!   synchronously
//! - The first transition out of `pending` wins; any later approve, deny
//!   or timeout is discarded and reported as
//!   [`ApprovalError::AlreadyResolved`]
//! - The approval window is measured on the clock service
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use bulwark_approval::{Admission, ApprovalGate, ApprovalStatus, ApprovalSubmission, RiskPolicy};
//! use bulwark_clock::ClockService;
//! use bulwark_core::{ActionId, NodeId, PrincipalId, RiskLevel};
//!
//! # tokio_test_block_on(async {
//! let clock = Arc::new(ClockService::system(NodeId::new("local")));
//! let gate = ApprovalGate::new(RiskPolicy::default(), clock);
//!
//! let admission = gate
//!     .submit(ApprovalSubmission {
//!         action_id: ActionId::new(),
//!         principal: PrincipalId::new("agent-7"),
//!         risk_level: RiskLevel::MAX,
//!         summary: "drop staging table".into(),
//!         state: serde_json::json!({ "table": "staging" }),
//!     })
//!     .unwrap();
//!
//! let Admission::Pending(request) = admission else { unreachable!() };
//! gate.approve(request.id, "ops", None).await.unwrap();
//! let resolved = gate.wait(request.id).await.unwrap();
//! assert_eq!(resolved.status, ApprovalStatus::Approved);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(f)
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod gate;
mod policy;
mod request;

pub use error::{ApprovalError, ApprovalResult};
pub use gate::{Admission, ApprovalGate, CANCELLED_REASON, SYSTEM_APPROVER};
pub use policy::RiskPolicy;
pub use request::{
    ApprovalRequest, ApprovalStatus, ApprovalSubmission, REDACTED, Resolution, sanitize_state,
};
