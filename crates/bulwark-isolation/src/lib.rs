//! Bulwark Isolation - boundary selection and execution.
//!
//! This crate provides:
//! - [`IsolationPolicy`]: the effective boundary from trust, risk and the
//!   declared type. Never weaker than either the declaration or the trust
//!   floor
//! - [`InlineBoundary`], [`SubprocessBoundary`], [`ContainerBoundary`]:
//!   the three boundary kinds behind the [`Boundary`] trait
//! - [`IsolationExecutor`]: spawns with retry, enforces the wall-clock
//!   limit, honors cancellation and always tears the boundary down
//!
//! # Limits
//!
//! | Boundary   | wall-clock | cpu               | memory            |
//! |------------|------------|-------------------|-------------------|
//! | inline     | executor   | -                 | -                 |
//! | subprocess | executor   | `RLIMIT_CPU`      | `RLIMIT_AS`       |
//! | container  | executor   | `--ulimit cpu`    | `--memory`        |
//!
//! # Example
//!
//! ```
//! use async_trait::async_trait;
//! use bulwark_core::{ActionId, IsolationType, ResourceLimits};
//! use bulwark_isolation::{ActionBody, InlineAction, Invocation, IsolationExecutor, IsolationPolicy};
//! use serde_json::{Value, json};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Double;
//!
//! #[async_trait]
//! impl InlineAction for Double {
//!     async fn run(&self, input: Value) -> Result<Value, String> {
//!         let n = input.as_i64().ok_or("expected a number")?;
//!         Ok(json!(n.saturating_mul(2)))
//!     }
//! }
//!
//! # tokio_test_block_on(async {
//! let executor = IsolationExecutor::new(IsolationPolicy::default());
//! let invocation = Invocation {
//!     action_id: ActionId::new(),
//!     body: ActionBody::inline(Double),
//!     input: json!(21),
//!     limits: ResourceLimits::default(),
//! };
//! let report = executor
//!     .execute(IsolationType::Inline, &invocation, &CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert_eq!(report.output, json!(42));
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

mod boundary;
mod container;
mod error;
mod executor;
mod inline;
mod selector;
mod subprocess;

pub use boundary::{ActionBody, Boundary, CommandSpec, InlineAction, Invocation, Running};
pub use container::{CONTAINER_PIDS_LIMIT, ContainerBoundary};
pub use error::{ExecutionFault, IsolationError, IsolationResult};
pub use executor::{DEFAULT_SPAWN_TIMEOUT, ExecutionReport, IsolationExecutor};
pub use inline::InlineBoundary;
pub use selector::IsolationPolicy;
pub use subprocess::{MAX_OUTPUT_BYTES, SubprocessBoundary};
