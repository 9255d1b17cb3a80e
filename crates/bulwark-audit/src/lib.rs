//! Bulwark Audit - the tamper-evident record of every gate decision.
//!
//! This crate provides:
//! - [`AuditLog`]: an append-only log whose entries are sequenced, stamped
//!   by the clock service, hash-chained and signed with the runtime key
//! - Chain verification that reports the first divergence
//! - Range, time-window and correlation queries, streaming and JSONL export
//!
//! # Chain
//!
//! `entry_hash` covers every field of an entry plus the previous entry's
//! hash, so editing, dropping or reordering any persisted entry is
//! detected by [`AuditLog::verify_chain`]. The genesis entry links to the
//! zero hash.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use bulwark_audit::{Actor, AuditEvent, AuditLog, AuditRecord};
//! use bulwark_clock::ClockService;
//! use bulwark_core::NodeId;
//! use bulwark_crypto::KeyPair;
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let clock = Arc::new(ClockService::system(NodeId::new("local")));
//! let log = AuditLog::in_memory(clock, KeyPair::generate());
//!
//! log.append(AuditRecord::new(
//!     Actor::System,
//!     AuditEvent::GrantsExpired { grant_ids: vec![] },
//! ))
//! .await
//! .unwrap();
//!
//! assert!(log.verify_chain(..).await.unwrap().is_valid());
//! # });
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod entry;
mod error;
mod log;

pub use entry::{Actor, AuditEntry, AuditEvent, AuditOutcome, AuditRecord, ENTRY_HASH_DOMAIN};
pub use error::{AuditError, AuditResult};
pub use log::{AuditHead, AuditLog, ChainIssue, ChainVerification, SequenceRange};
