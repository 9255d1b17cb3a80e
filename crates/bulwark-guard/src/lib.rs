//! Bulwark Guard - the execution gate every autonomous action passes
//! through.
//!
//! This crate provides:
//! - [`ExecutionGuard`]: validates, authorizes, approves, checkpoints,
//!   isolates and audits one action at a time, many at once
//! - [`ActionRequest`] / [`ActionResult`]: the submission and the
//!   `{success, result | error, metrics}` envelope
//! - [`GuardError`] with an [`ErrorKind`] tag and a retryability verdict
//! - [`CapabilityAdmin`]: grant, revoke and sweep, each audited
//!
//! # Failure handling
//!
//! | Failure | Kind | Retryable |
//! |---------|------|-----------|
//! | Malformed manifest | `invalid_manifest` | no |
//! | Missing capability | `capability` | no |
//! | Approval denied or expired | `approval` | via a fresh request |
//! | Snapshot impossible | `checkpoint` | only on lock contention |
//! | Boundary spawn failure | `isolation` | yes, after bounded retries |
//! | Action fault, timeout, limit breach | `execution_fault` | no |
//! | Audit write failure | `audit_write` | no |
//!
//! Once a checkpoint exists, every failure rolls back.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use bulwark_approval::RiskPolicy;
//! use bulwark_capabilities::Capability;
//! use bulwark_clock::ClockService;
//! use bulwark_core::{ActionManifest, ManifestCeilings, NodeId, PrincipalId, TrustLevel};
//! use bulwark_guard::{ActionRequest, ExecutionGuard, GuardServices};
//! use bulwark_isolation::{ActionBody, InlineAction};
//! use bulwark_storage::MemoryKvStore;
//! use serde_json::{Value, json};
//!
//! struct Greet;
//!
//! #[async_trait]
//! impl InlineAction for Greet {
//!     async fn run(&self, input: Value) -> Result<Value, String> {
//!         Ok(json!(format!("hello {}", input["name"].as_str().unwrap_or("?"))))
//!     }
//! }
//!
//! # tokio_test_block_on(async {
//! let clock = Arc::new(ClockService::system(NodeId::new("local")));
//! let services = GuardServices::in_memory(clock, RiskPolicy::default(), Arc::new(MemoryKvStore::new()));
//! let agent = PrincipalId::new("agent-7");
//! services
//!     .registry
//!     .grant(&agent, Capability::parse("tool:call:/greet").unwrap(), None, "ops")
//!     .await
//!     .unwrap();
//! let guard = ExecutionGuard::new(services, ManifestCeilings::default());
//!
//! let manifest = ActionManifest::builder("greet")
//!     .capability("tool:call:/greet")
//!     .risk_level(1)
//!     .trust_level(TrustLevel::Builtin)
//!     .build();
//! let result = guard
//!     .execute(ActionRequest::new(agent, manifest, ActionBody::inline(Greet)).with_input(json!({ "name": "ada" })))
//!     .await;
//! assert!(result.success);
//! assert_eq!(result.result, Some(json!("hello ada")));
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

mod admin;
mod error;
mod guard;
mod request;
mod result;
#[cfg(test)]
mod testing;
mod trail;

pub use admin::CapabilityAdmin;
pub use error::{ErrorKind, GuardError, GuardResult};
pub use guard::{ActionHandle, ExecutionGuard, GuardServices, SHUTDOWN_REASON};
pub use request::{ActionRequest, ExecutionContext};
pub use result::{ActionMetrics, ActionResult, ErrorReport};
