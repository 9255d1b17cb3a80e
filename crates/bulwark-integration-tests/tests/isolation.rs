//! Boundary selection and process boundaries driven through the guard.

mod common;

use std::time::{Duration, Instant};

use bulwark_core::{IsolationType, RiskLevel, TrustLevel};
use bulwark_guard::{ActionRequest, ErrorKind};
use bulwark_isolation::{ActionBody, CommandSpec, IsolationPolicy};
use common::{Echo, Harness, Stall, manifest};
use serde_json::json;

fn risk(level: u8) -> RiskLevel {
    RiskLevel::new(level).unwrap()
}

#[test]
fn test_selection_never_weakens_the_trust_floor() {
    let policy = IsolationPolicy::default();
    assert_eq!(
        policy.select(TrustLevel::Unverified, risk(1), IsolationType::Inline),
        IsolationType::Container
    );
    assert_eq!(
        policy.select(TrustLevel::Verified, risk(1), IsolationType::Inline),
        IsolationType::Subprocess
    );
    assert_eq!(
        policy.select(TrustLevel::Builtin, risk(5), IsolationType::Inline),
        IsolationType::Inline
    );
    assert_eq!(
        policy.select(TrustLevel::Builtin, risk(1), IsolationType::Container),
        IsolationType::Container
    );

    let strict = policy.with_container_at_risk(risk(4));
    assert_eq!(
        strict.select(TrustLevel::Builtin, risk(4), IsolationType::Inline),
        IsolationType::Container
    );
    assert_eq!(
        strict.select(TrustLevel::Trusted, risk(3), IsolationType::Inline),
        IsolationType::Subprocess
    );
}

#[tokio::test]
async fn test_unverified_inline_action_is_refused() {
    let h = Harness::new().await;
    h.grant("kv:read:/app/**").await;

    let mut m = manifest(1, &["kv:read:/app/config"]);
    m.trust_level = TrustLevel::Unverified;
    let result = h
        .guard
        .execute(ActionRequest::new(h.agent.clone(), m, ActionBody::inline(Echo)))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::Isolation));
    assert!(
        result.error.as_ref().unwrap().detail.contains("container"),
        "{:?}",
        result.error
    );
    let events = h.events(result.correlation_id).await;
    assert_eq!(events.last(), Some(&"execution_failed"));
    h.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_sees_context_and_input() {
    let h = Harness::new().await;
    h.grant("kv:read:/app/**").await;

    let script = r#"read -r input
printf '{"principal":"%s","caps":"%s","timeout":"%s","input":%s}' \
  "$BULWARK_PRINCIPAL" "$BULWARK_CAPABILITIES" "$BULWARK_TIMEOUT_SECS" "$input""#;
    let mut m = manifest(1, &["kv:read:/app/config"]);
    m.isolation_type = IsolationType::Subprocess;
    m.limits.timeout_secs = 20;
    let body = ActionBody::Command(
        CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg(script)
            .env("BULWARK_PRINCIPAL", "spoofed"),
    );

    let result = h
        .guard
        .execute(ActionRequest::new(h.agent.clone(), m, body).with_input(json!({ "n": 3 })))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.metrics.boundary, Some(IsolationType::Subprocess));
    let output = result.result.unwrap();
    assert_eq!(output["principal"], "agent-7");
    assert_eq!(output["caps"], "kv:read:/app/config");
    assert_eq!(output["timeout"], "20");
    assert_eq!(output["input"], json!({ "n": 3 }));
    h.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_output_shapes() {
    let h = Harness::new().await;
    h.grant("kv:read:/app/**").await;

    let run = |script: &'static str| {
        let mut m = manifest(1, &["kv:read:/app/config"]);
        m.isolation_type = IsolationType::Subprocess;
        ActionRequest::new(
            h.agent.clone(),
            m,
            ActionBody::Command(CommandSpec::new("/bin/sh").arg("-c").arg(script)),
        )
    };

    let text = h.guard.execute(run("echo plain words")).await;
    assert_eq!(text.result, Some(json!("plain words")));

    let silent = h.guard.execute(run("true")).await;
    assert!(silent.success);
    assert_eq!(silent.result, Some(serde_json::Value::Null));

    let failed = h.guard.execute(run("echo broken >&2; exit 3")).await;
    assert_eq!(failed.error_kind(), Some(ErrorKind::ExecutionFault));
    assert!(
        failed.error.as_ref().unwrap().detail.contains("broken"),
        "{:?}",
        failed.error
    );
    h.close().await;
}

#[cfg(unix)]
#[tokio::test]
async fn test_wall_clock_limit_kills_the_process() {
    let h = Harness::new().await;
    h.grant("kv:read:/app/**").await;

    let mut m = manifest(1, &["kv:read:/app/config"]);
    m.isolation_type = IsolationType::Subprocess;
    m.limits.timeout_secs = 1;
    let body = ActionBody::Command(CommandSpec::new("/bin/sh").arg("-c").arg("sleep 30"));

    let started = Instant::now();
    let result = h
        .guard
        .execute(ActionRequest::new(h.agent.clone(), m, body))
        .await;

    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionFault));
    assert!(
        result.error.as_ref().unwrap().detail.contains("wall-clock"),
        "{:?}",
        result.error
    );
    assert_eq!(h.events(result.correlation_id).await.last(), Some(&"execution_failed"));
    h.close().await;
}

#[tokio::test]
async fn test_cancelling_a_running_action() {
    let h = Harness::new().await;
    h.grant("kv:read:/app/**").await;

    let handle = h.guard.spawn(ActionRequest::new(
        h.agent.clone(),
        manifest(1, &["kv:read:/app/config"]),
        ActionBody::inline(Stall),
    ));
    let correlation_id = handle.correlation_id();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(h.guard.in_flight(), 1);
    handle.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap();
    assert_eq!(result.error_kind(), Some(ErrorKind::Cancelled));
    assert!(!result.error.as_ref().unwrap().retryable);

    let events = h.events(correlation_id).await;
    assert!(events.contains(&"execution_started"));
    assert_eq!(events.last(), Some(&"execution_cancelled"));
    h.close().await;
}
