//! Bulwark Telemetry - logging and tracing for the Bulwark execution gate.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats and targets
//! - [`ActionContext`] for correlating log lines with one guarded action
//!
//! # Example
//!
//! ```rust,no_run
//! use bulwark_core::PrincipalId;
//! use bulwark_telemetry::{ActionContext, LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), bulwark_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("bulwark_guard=debug");
//! setup_logging(&config)?;
//!
//! let ctx = ActionContext::new(PrincipalId::new("agent-7")).with_action_name("deploy");
//! let _entered = ctx.span().entered();
//! tracing::info!("admitted");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::ActionContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
