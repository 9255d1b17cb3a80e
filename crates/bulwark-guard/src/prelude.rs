//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bulwark_guard::prelude::*;` to import all essential types.

// Errors
pub use crate::{ErrorKind, GuardError, GuardResult};

// Guard
pub use crate::{ActionHandle, ExecutionGuard, GuardServices};

// Envelope
pub use crate::{ActionMetrics, ActionRequest, ActionResult, ErrorReport};

// Administration
pub use crate::CapabilityAdmin;
