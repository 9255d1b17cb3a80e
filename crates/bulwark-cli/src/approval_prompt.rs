//! Terminal approver for `bulwark run`.
//!
//! Subscribes to the approval gate and asks on the terminal for each new
//! request. A prompt that fails (no TTY, closed stdin) denies the request.

use std::sync::Arc;

use bulwark_approval::{ApprovalGate, ApprovalRequest};
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::theme::Theme;

/// Render a request as an approval box.
pub(crate) fn render(request: &ApprovalRequest) -> String {
    let mut content = vec![
        Theme::kv("Principal", request.principal.as_str()),
        Theme::kv("Risk", &Theme::risk_level(request.risk_level)),
        Theme::kv("Action", &request.action_id.to_string()),
        Theme::kv("Expires", &Theme::timestamp(&request.timeout_at)),
    ];
    if !request.state_snapshot.is_null() {
        content.push(Theme::kv("State", &request.state_snapshot.to_string()));
    }
    Theme::approval_box(&request.summary, &content.join("\n"), request.risk_level)
}

/// Answer requests from `gate` as `approver` until the gate's sender is
/// dropped or the task is aborted.
pub(crate) fn spawn(gate: Arc<ApprovalGate>, approver: String) -> JoinHandle<()> {
    let mut requests = gate.subscribe();
    tokio::spawn(async move {
        loop {
            let request = match requests.recv().await {
                Ok(request) => request,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "approval prompt fell behind");
                    continue;
                },
                Err(RecvError::Closed) => break,
            };

            println!("\n{}\n", render(&request));
            let prompt = format!("Approve \"{}\"?", request.summary);
            let answer = tokio::task::spawn_blocking(move || {
                Confirm::with_theme(&ColorfulTheme::default())
                    .with_prompt(prompt)
                    .default(false)
                    .interact()
            })
            .await;

            let decision = match answer {
                Ok(Ok(true)) => {
                    gate.approve(request.id, &approver, Some("approved at terminal".into()))
                        .await
                },
                Ok(Ok(false)) => {
                    gate.deny(request.id, &approver, Some("denied at terminal".into()))
                        .await
                },
                Ok(Err(e)) => {
                    warn!(error = %e, "approval prompt failed; denying");
                    gate.deny(request.id, &approver, Some("no terminal answer".into()))
                        .await
                },
                Err(e) => {
                    warn!(error = %e, "approval prompt task failed; denying");
                    gate.deny(request.id, &approver, Some("no terminal answer".into()))
                        .await
                },
            };

            match decision {
                Ok(resolved) => println!("{}", Theme::info(&format!("Request {}", resolved.status))),
                Err(e) if e.is_conflict() => {
                    println!("{}", Theme::warning("Request was already resolved (expired or cancelled)"));
                },
                Err(e) => warn!(error = %e, "failed to record approval decision"),
            }
        }
    })
}
