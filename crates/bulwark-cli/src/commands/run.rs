//! Run command - submit one action manifest through the guard.

use std::path::Path;

use anyhow::{Context, Result};
use bulwark_guard::{ActionRequest, ActionResult};
use colored::Colorize;
use serde_json::Value;
use tracing::{info, warn};

use crate::approval_prompt;
use crate::formatter::{OutputFormat, print_json};
use crate::manifest_file;
use crate::runtime::Runtime;
use crate::theme::Theme;

/// Options for `bulwark run`.
#[derive(Debug)]
pub(crate) struct RunOptions<'a> {
    /// Manifest file.
    pub(crate) manifest: &'a Path,
    /// Principal the action runs as.
    pub(crate) principal: &'a str,
    /// JSON input handed to the action.
    pub(crate) input: Option<&'a str>,
    /// Name recorded on terminal approvals.
    pub(crate) approver: &'a str,
}

/// Run the manifest and print its result. Returns whether it succeeded.
pub(crate) async fn run(runtime: &Runtime, opts: &RunOptions<'_>, format: OutputFormat) -> Result<bool> {
    let loaded = manifest_file::load(
        opts.manifest,
        runtime.config().isolation.container_image.as_deref(),
    )?;
    let input: Value = match opts.input {
        Some(raw) => serde_json::from_str(raw).context("--input is not valid JSON")?,
        None => Value::Null,
    };

    let mut request = ActionRequest::new(opts.principal, loaded.manifest, loaded.body).with_input(input);
    if let Some(summary) = loaded.summary {
        request = request.with_summary(summary);
    }

    let guard = runtime.guard();
    let prompt = approval_prompt::spawn(
        std::sync::Arc::clone(guard.approvals()),
        opts.approver.to_string(),
    );

    let handle = guard.spawn(request);
    info!(action_id = %handle.action_id(), "action submitted");

    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", Theme::warning("Interrupted, cancelling action"));
            token.cancel();
        }
    });

    let result = handle.join().await;
    interrupt.abort();
    prompt.abort();

    if let Err(e) = guard.shutdown().await {
        warn!(error = %e, "guard shutdown incomplete");
    }

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Pretty => print_result(&result)?,
    }
    Ok(result.success)
}

fn print_result(result: &ActionResult) -> Result<()> {
    println!();
    if result.success {
        println!("{}", Theme::success("Action completed"));
    } else if let Some(error) = &result.error {
        println!(
            "{}",
            Theme::error(&format!("Action failed [{}]: {}", error.kind.as_str(), error.detail))
        );
        if error.retryable {
            println!("  {}", "retryable".yellow());
        }
    }

    println!("  Action:      {}", result.action_id);
    println!("  Correlation: {}", result.correlation_id);
    let m = &result.metrics;
    if let Some(boundary) = &m.boundary {
        println!("  Boundary:    {boundary:?} ({} spawn attempts)", m.spawn_attempts);
    }
    println!(
        "  Timing:      {} ms total, {} ms executing, {} ms awaiting approval",
        m.total_ms, m.execution_ms, m.approval_wait_ms
    );
    if let Some(cp) = &m.checkpoint_id {
        let state = if m.rolled_back { "rolled back" } else { "committed" };
        println!("  Checkpoint:  {cp} ({state})");
    }
    println!("  Audit:       {} entries", m.audit_entries);

    if let Some(value) = &result.result {
        println!("\n{}", Theme::header("Result"));
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
