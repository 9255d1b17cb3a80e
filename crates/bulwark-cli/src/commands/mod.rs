//! CLI command implementations.

pub(crate) mod audit;
pub(crate) mod caps;
pub(crate) mod checkpoints;
pub(crate) mod config;
pub(crate) mod run;
