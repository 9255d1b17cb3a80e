//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bulwark_approval::prelude::*;` to import all essential types.

// Errors
pub use crate::{ApprovalError, ApprovalResult};

// Policy
pub use crate::RiskPolicy;

// Gate
pub use crate::{Admission, ApprovalGate, ApprovalRequest, ApprovalStatus, ApprovalSubmission};
