//! Output format selection.

use anyhow::Result;
use serde::Serialize;

/// Output format mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    /// Styled tables and messages.
    Pretty,
    /// One JSON document on stdout.
    Json,
}

/// Print `value` as pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
