//! Bulwark Capabilities - who may do what.
//!
//! This crate provides:
//! - [`Capability`]: a parsed `class:action:scope` pattern with a closed,
//!   structural matcher (no free-form globbing)
//! - [`CapabilityRegistry`]: per-principal grants with expiry judged by the
//!   clock service, revocation tombstones and optional persistence
//!
//! # Security Model
//!
//! - Deny by default: a principal with no matching live grant fails every
//!   non-empty check, and a failed check is a `false`, never an error that
//!   a caller could swallow
//! - A grant never implies a broader pattern than the one declared
//! - Checks are answered from memory; mutations persist before they become
//!   visible
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use bulwark_capabilities::{Capability, CapabilityRegistry};
//! use bulwark_clock::ClockService;
//! use bulwark_core::{NodeId, PrincipalId};
//!
//! # tokio_test_block_on(async {
//! let clock = Arc::new(ClockService::system(NodeId::new("local")));
//! let registry = CapabilityRegistry::new(clock);
//! let agent = PrincipalId::new("agent-7");
//!
//! let held = Capability::parse("fs:read:/workspace/**").unwrap();
//! registry.grant(&agent, held, None, "admin").await.unwrap();
//!
//! let wanted = Capability::parse("fs:read:/workspace/notes/today.md").unwrap();
//! assert!(registry.check(&agent, &[wanted]));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
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
mod grant;
mod pattern;
mod registry;

pub use error::{CapabilityError, CapabilityResult};
pub use grant::{CapabilityCheck, Grant, RevocationReason, Tombstone};
pub use pattern::{ActionMatcher, Capability, MAX_SEGMENTS, ResourceClass, ScopePattern, Segment};
pub use registry::{CapabilityRegistry, Issued};
