//! Checkpoints command - inspect stored pre-action snapshots.

use anyhow::Result;
use bulwark_checkpoint::Checkpoint;
use bulwark_core::{ActionId, CheckpointId, PrincipalId, Timestamp};
use colored::Colorize;
use serde::Serialize;

use crate::formatter::{OutputFormat, print_json};
use crate::runtime::Runtime;
use crate::theme::Theme;

/// Checkpoint metadata without the snapshot bytes.
#[derive(Debug, Serialize)]
struct CheckpointSummary {
    id: CheckpointId,
    action_id: ActionId,
    principal: PrincipalId,
    scope: String,
    created_at: Timestamp,
    bytes: u64,
    intact: bool,
}

impl From<&Checkpoint> for CheckpointSummary {
    fn from(cp: &Checkpoint) -> Self {
        Self {
            id: cp.id,
            action_id: cp.action_id,
            principal: cp.principal.clone(),
            scope: cp.scope.to_string(),
            created_at: cp.created_at,
            bytes: cp.byte_len(),
            intact: cp.verify_integrity(),
        }
    }
}

/// List checkpoints still held for in-flight or crashed actions.
pub(crate) async fn list(runtime: &Runtime, format: OutputFormat) -> Result<()> {
    let checkpoints = runtime.services().checkpoints.list().await?;
    let summaries: Vec<CheckpointSummary> = checkpoints.iter().map(Into::into).collect();

    if format == OutputFormat::Json {
        return print_json(&summaries);
    }

    if summaries.is_empty() {
        println!("{}", Theme::info("No checkpoints"));
        return Ok(());
    }

    println!("\n{}", Theme::header("Checkpoints"));
    println!(
        "{:<10} {:<10} {:<16} {:>10} {:<6} {}",
        "ID".dimmed(),
        "ACTION".dimmed(),
        "PRINCIPAL".dimmed(),
        "BYTES".dimmed(),
        "OK".dimmed(),
        "SCOPE".dimmed()
    );
    println!("{}", Theme::separator());
    for cp in &summaries {
        let intact = if cp.intact {
            "yes".green().to_string()
        } else {
            "NO".red().to_string()
        };
        println!(
            "{:<10} {:<10} {:<16} {:>10} {:<6} {}",
            Theme::short_id(&cp.id.to_string()),
            Theme::short_id(&cp.action_id.to_string()),
            cp.principal,
            cp.bytes,
            intact,
            cp.scope
        );
    }
    println!();
    Ok(())
}
