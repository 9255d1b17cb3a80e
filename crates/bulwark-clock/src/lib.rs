//! Bulwark Clock - the timestamp authority for the gate.
//!
//! Every audit entry, grant expiry, approval deadline and checkpoint is
//! stamped by one [`ClockService`]. It provides:
//! - Strictly increasing local timestamps, even if the wall clock steps back
//! - Per-node offsets learned from an external synchronization handshake
//! - Normalization of remote timestamps into the local timeline
//! - Causal observation: after observing a remote event, every later local
//!   timestamp sorts after it
//!
//! # Example
//!
//! ```
//! use bulwark_clock::ClockService;
//! use bulwark_core::NodeId;
//!
//! let clock = ClockService::system(NodeId::new("local"));
//! let a = clock.now();
//! let b = clock.now();
//! assert!(a < b);
//!
//! clock.set_offset(NodeId::new("worker-2"), 1_500);
//! let remote = b.saturating_add(std::time::Duration::from_millis(1_500));
//! assert_eq!(clock.normalize(remote, 1_500), b);
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod clock;
mod error;
mod source;

pub use clock::{ClockService, DEFAULT_MAX_DRIFT};
pub use error::{ClockError, ClockResult};
pub use source::{ManualTimeSource, SystemTimeSource, TimeSource};
