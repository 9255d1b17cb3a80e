//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bulwark_audit::prelude::*;` to import all essential types.

// Errors
pub use crate::{AuditError, AuditResult};

// Entries
pub use crate::{Actor, AuditEntry, AuditEvent, AuditOutcome, AuditRecord};

// Log
pub use crate::{AuditLog, ChainIssue, ChainVerification, SequenceRange};
