//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bulwark_capabilities::prelude::*;` to import all essential types.

// Errors
pub use crate::{CapabilityError, CapabilityResult};

// Patterns
pub use crate::{Capability, ResourceClass};

// Registry
pub use crate::{CapabilityCheck, CapabilityRegistry, Grant, Tombstone};
