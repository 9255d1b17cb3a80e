//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bulwark_checkpoint::prelude::*;` to import all essential types.

// Errors
pub use crate::{CheckpointError, CheckpointResult};

// Scopes
pub use crate::{CheckpointScope, ScopeLocks};

// State backends
pub use crate::{CompositeStateStore, FsStateStore, KvStateStore, StateStore};

// Checkpoints
pub use crate::{Checkpoint, CheckpointStore};
