//! Bulwark Storage - namespaced key-value persistence.
//!
//! Every durable structure in the gate (grants, tombstones, the audit chain,
//! checkpoints, archived approvals) is stored through the [`KvStore`] trait:
//!
//! - [`MemoryKvStore`] (always available): tests and ephemeral runs
//! - [`SurrealKvStore`] (behind the **`kv`** feature): embedded, ACID,
//!   LSM-tree storage for a data directory
//!
//! Keys within a namespace are ordered bytewise, which the audit log relies
//! on for sequence-ordered scans.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use kv::{KvStore, KvWrite, MemoryKvStore, ScopedKvStore};

#[cfg(feature = "kv")]
pub use kv::SurrealKvStore;
