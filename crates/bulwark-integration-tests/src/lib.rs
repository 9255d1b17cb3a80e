//! End-to-end tests for the bulwark workspace.
//!
//! The guard runs against persistent services in a temp directory; see
//! `tests/common/mod.rs`. Nothing here is published.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
