//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bulwark_isolation::prelude::*;` to import all essential types.

// Errors
pub use crate::{ExecutionFault, IsolationError, IsolationResult};

// Selection
pub use crate::IsolationPolicy;

// Execution
pub use crate::{
    ActionBody, CommandSpec, ExecutionReport, InlineAction, Invocation, IsolationExecutor,
};
