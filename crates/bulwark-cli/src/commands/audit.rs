//! Audit command - view, verify and export the audit chain.

use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use bulwark_audit::{AuditEntry, SequenceRange};
use bulwark_core::{CorrelationId, Timestamp};
use chrono::{DateTime, Utc};
use colored::Colorize;
use serde::Serialize;

use crate::formatter::{OutputFormat, print_json};
use crate::runtime::Runtime;
use crate::theme::Theme;

/// Which entries `audit list` shows.
#[derive(Debug, Default)]
pub(crate) struct EntryFilter {
    /// First sequence number.
    pub(crate) from: Option<u64>,
    /// Last sequence number.
    pub(crate) to: Option<u64>,
    /// RFC 3339 lower bound, inclusive.
    pub(crate) since: Option<String>,
    /// RFC 3339 upper bound, exclusive.
    pub(crate) until: Option<String>,
    /// One guarded execution.
    pub(crate) correlation: Option<String>,
}

fn parse_time(raw: &str) -> Result<Timestamp> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid RFC 3339 timestamp '{raw}'"))?;
    Ok(Timestamp(parsed.with_timezone(&Utc)))
}

async fn select(runtime: &Runtime, filter: &EntryFilter) -> Result<Vec<AuditEntry>> {
    let audit = &runtime.services().audit;

    if let Some(raw) = &filter.correlation {
        let id: CorrelationId = raw
            .parse()
            .with_context(|| format!("invalid correlation id '{raw}'"))?;
        return Ok(audit.entries_for_correlation(id).await?);
    }

    if filter.since.is_some() || filter.until.is_some() {
        let from = match &filter.since {
            Some(raw) => parse_time(raw)?,
            None => Timestamp(DateTime::<Utc>::MIN_UTC),
        };
        let to = match &filter.until {
            Some(raw) => parse_time(raw)?,
            None => Timestamp(DateTime::<Utc>::MAX_UTC),
        };
        let mut entries = audit.entries_between(from, to).await?;
        entries.retain(|e| {
            filter.from.is_none_or(|f| e.sequence >= f) && filter.to.is_none_or(|t| e.sequence <= t)
        });
        return Ok(entries);
    }

    Ok(audit
        .entries(SequenceRange::new(filter.from, filter.to))
        .await?)
}

/// Show audit entries.
pub(crate) async fn list(runtime: &Runtime, filter: &EntryFilter, format: OutputFormat) -> Result<()> {
    let entries = select(runtime, filter).await?;

    if format == OutputFormat::Json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        println!("{}", Theme::info("No audit entries"));
        return Ok(());
    }

    println!("\n{}", Theme::header("Audit Entries"));
    println!(
        "{:>6} {:>19} {:<10} {:<5} {}",
        "SEQ".dimmed(),
        "TIMESTAMP".dimmed(),
        "ACTION".dimmed(),
        "RESULT".dimmed(),
        "EVENT".dimmed()
    );
    println!("{}", Theme::separator());

    for entry in &entries {
        let action = entry
            .action_id
            .map_or_else(|| "-".to_string(), |id| Theme::short_id(&id.to_string()));
        let result = if entry.outcome.is_success() {
            "OK".green().to_string()
        } else {
            "FAIL".red().to_string()
        };
        println!(
            "{:>6} {:>19} {:<10} {:<5} {} {}",
            entry.sequence,
            Theme::timestamp(&entry.timestamp),
            action,
            result,
            entry.event.description(),
            format!("({})", entry.actor).dimmed()
        );
    }

    println!();
    Ok(())
}

#[derive(Debug, Serialize)]
struct VerifyReport {
    valid: bool,
    entries_verified: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    issue: Option<String>,
    head_sequence: u64,
    head_hash: String,
    runtime_key: String,
}

/// Verify hash links and signatures. Exits non-zero on divergence.
pub(crate) async fn verify(
    runtime: &Runtime,
    from: Option<u64>,
    to: Option<u64>,
    format: OutputFormat,
) -> Result<bool> {
    let audit = &runtime.services().audit;
    let result = audit.verify_chain(SequenceRange::new(from, to)).await?;
    let head = audit.head().await;

    let report = VerifyReport {
        valid: result.is_valid(),
        entries_verified: result.entries_verified,
        issue: result.issue.as_ref().map(ToString::to_string),
        head_sequence: head.sequence,
        head_hash: head.hash.to_hex(),
        runtime_key: audit.runtime_public_key().key_id_hex(),
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Pretty => {
            if let Some(issue) = &report.issue {
                println!(
                    "{}",
                    Theme::error(&format!(
                        "Chain diverges after {} verified entries",
                        report.entries_verified
                    ))
                );
                println!("  - {issue}");
            } else {
                println!(
                    "{}",
                    Theme::success(&format!(
                        "Chain verified: {} entries, no issues",
                        report.entries_verified
                    ))
                );
            }
            println!("  Head: {} @ {}", report.head_sequence, &report.head_hash[..16]);
            println!("  Runtime key: {}", report.runtime_key);
        },
    }

    Ok(report.valid)
}

/// Write the whole chain as JSON lines to `output`, or stdout.
pub(crate) async fn export(runtime: &Runtime, output: Option<&Path>) -> Result<()> {
    let audit = &runtime.services().audit;
    match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = BufWriter::new(file);
            let count = audit.export_jsonl(&mut writer).await?;
            writer.flush()?;
            eprintln!(
                "{}",
                Theme::success(&format!("Exported {count} entries to {}", path.display()))
            );
        },
        None => {
            let mut writer = BufWriter::new(std::io::stdout());
            audit.export_jsonl(&mut writer).await?;
            writer.flush()?;
        },
    }
    Ok(())
}
