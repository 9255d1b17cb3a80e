//! Bulwark Checkpoint - scoped snapshots and rollback around risky actions.
//!
//! This crate provides:
//! - [`CheckpointScope`]: the stateful prefixes an action may write,
//!   derived from its declared capabilities
//! - [`ScopeLocks`]: exclusive, all-or-nothing locks over scopes
//! - [`StateStore`] backends: [`KvStateStore`] for `kv:` scopes,
//!   [`FsStateStore`] for `fs:` scopes, [`CompositeStateStore`] to route
//!   between them
//! - [`CheckpointStore`]: create, restore, rollback and commit
//!
//! # Lock discipline
//!
//! [`CheckpointStore::create`] holds the scope lock until
//! [`CheckpointStore::commit`] or [`CheckpointStore::rollback`]. Between
//! those points no other checkpointed action can touch an overlapping
//! scope, which is what makes restoring the snapshot sound.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use bulwark_capabilities::{Capability, ResourceClass};
//! use bulwark_checkpoint::{CheckpointScope, CheckpointStore, CompositeStateStore, KvStateStore};
//! use bulwark_clock::ClockService;
//! use bulwark_core::{ActionId, NodeId, PrincipalId};
//! use bulwark_storage::{KvStore, MemoryKvStore};
//!
//! # tokio_test_block_on(async {
//! let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
//! let states = CompositeStateStore::new()
//!     .with(ResourceClass::Kv, Arc::new(KvStateStore::new(Arc::clone(&kv))));
//! let clock = Arc::new(ClockService::system(NodeId::new("local")));
//! let checkpoints = CheckpointStore::new(clock, Arc::new(states));
//!
//! let agent = PrincipalId::new("agent-7");
//! let caps = [Capability::parse("kv:set:/app/**").unwrap()];
//! kv.set("state:app", "mode", b"stable".to_vec()).await.unwrap();
//!
//! let cp = checkpoints
//!     .create(ActionId::new(), &agent, CheckpointScope::from_capabilities(&caps))
//!     .await
//!     .unwrap();
//! kv.set("state:app", "mode", b"broken".to_vec()).await.unwrap();
//! checkpoints.rollback(cp.id, &agent).await.unwrap();
//!
//! assert_eq!(kv.get("state:app", "mode").await.unwrap(), Some(b"stable".to_vec()));
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
mod fs;
mod kv;
mod scope;
mod state;
mod store;

pub use error::{CheckpointError, CheckpointResult};
pub use fs::{DEFAULT_MAX_SNAPSHOT_BYTES, FsStateStore};
pub use kv::{KvStateStore, STATE_NAMESPACE_PREFIX};
pub use scope::{CheckpointScope, STATEFUL_CLASSES, ScopeEntry, ScopeGuard, ScopeLocks};
pub use state::{Blob, CompositeStateStore, ScopeState, StateSnapshot, StateStore};
pub use store::{CHECKPOINT_HASH_DOMAIN, Checkpoint, CheckpointStore, DEFAULT_LOCK_TIMEOUT};
