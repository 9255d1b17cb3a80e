//! Approval decisions are final: the first resolution stands, including
//! across a restart.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;
use std::time::Duration;

use bulwark_approval::{
    Admission, ApprovalError, ApprovalGate, ApprovalRequest, ApprovalStatus, ApprovalSubmission,
    REDACTED, RiskPolicy,
};
use bulwark_clock::{ClockService, ManualTimeSource};
use bulwark_core::{ActionId, DeploymentMode, NodeId, PrincipalId, RiskLevel, Timestamp};
use bulwark_storage::{KvStore, SurrealKvStore};
use serde_json::{Value, json};

fn submission(risk: u8, state: Value) -> ApprovalSubmission {
    ApprovalSubmission {
        action_id: ActionId::new(),
        principal: PrincipalId::new("agent-7"),
        risk_level: RiskLevel::new(risk).unwrap(),
        summary: "rotate credentials".to_string(),
        state,
    }
}

fn pending(gate: &ApprovalGate, risk: u8) -> ApprovalRequest {
    match gate.submit(submission(risk, Value::Null)).unwrap() {
        Admission::Pending(request) => request,
        Admission::AutoApproved => panic!("risk {risk} should need approval"),
    }
}

fn supervised(clock: Arc<ClockService>) -> ApprovalGate {
    ApprovalGate::new(RiskPolicy::for_mode(DeploymentMode::Supervised), clock)
}

fn system_clock() -> Arc<ClockService> {
    Arc::new(ClockService::system(NodeId::new("it")))
}

#[tokio::test]
async fn test_racing_decisions_have_one_winner() {
    let gate = Arc::new(supervised(system_clock()));
    let request = pending(&gate, 4);

    let mut tasks = Vec::new();
    for i in 0..16 {
        let gate = Arc::clone(&gate);
        tasks.push(tokio::spawn(async move {
            let by = format!("approver-{i}");
            if i % 2 == 0 {
                gate.approve(request.id, &by, None).await
            } else {
                gate.deny(request.id, &by, Some("no".to_string())).await
            }
        }));
    }

    let mut winners = Vec::new();
    for task in tasks {
        match task.await.unwrap() {
            Ok(resolved) => winners.push(resolved),
            Err(e) => assert!(e.is_conflict(), "{e}"),
        }
    }
    assert_eq!(winners.len(), 1);
    let winner = &winners[0];

    let settled = gate.wait(request.id).await.unwrap();
    assert_eq!(settled.status, winner.status);
    assert_eq!(
        settled.resolution.as_ref().unwrap().by,
        winner.resolution.as_ref().unwrap().by
    );
}

#[tokio::test]
async fn test_first_resolution_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store");

    let store = Arc::new(SurrealKvStore::open(&path).unwrap());
    let gate = supervised(system_clock())
        .with_archive(Arc::clone(&store) as Arc<dyn KvStore>)
        .unwrap();
    let request = pending(&gate, 3);
    gate.approve(request.id, "alice", Some("looks fine".to_string()))
        .await
        .unwrap();

    let late = gate.deny(request.id, "bob", None).await.unwrap_err();
    assert!(matches!(
        late,
        ApprovalError::AlreadyResolved {
            status: ApprovalStatus::Approved,
            ..
        }
    ));
    drop(gate);
    store.close().await.unwrap();
    drop(store);

    let store = Arc::new(SurrealKvStore::open(&path).unwrap());
    let gate = supervised(system_clock())
        .with_archive(Arc::clone(&store) as Arc<dyn KvStore>)
        .unwrap();
    assert!(gate.get(request.id).is_none());

    let archived = gate.find(request.id).await.unwrap().unwrap();
    assert_eq!(archived.status, ApprovalStatus::Approved);
    let resolution = archived.resolution.unwrap();
    assert_eq!(resolution.by, "alice");
    assert_eq!(resolution.reason.as_deref(), Some("looks fine"));

    let after_restart = gate.deny(request.id, "bob", None).await.unwrap_err();
    assert!(after_restart.is_conflict());
    assert!(gate.pending().is_empty());
    store.close().await.unwrap();
}

#[tokio::test]
async fn test_decision_after_window_loses_to_expiry() {
    let source = Arc::new(ManualTimeSource::new(Timestamp::from_micros(1_000_000)));
    let clock = Arc::new(ClockService::new(NodeId::new("it"), source.clone()));
    let gate = supervised(clock);
    let request = pending(&gate, 5);

    source.advance(Duration::from_secs(301));
    let late = gate.approve(request.id, "alice", None).await.unwrap_err();
    assert!(matches!(
        late,
        ApprovalError::AlreadyResolved {
            status: ApprovalStatus::Expired,
            ..
        }
    ));
    assert_eq!(gate.get(request.id).unwrap().status, ApprovalStatus::Expired);
    assert!(gate.deny(request.id, "bob", None).await.unwrap_err().is_conflict());
}

#[tokio::test]
async fn test_request_state_is_redacted_and_threshold_respected() {
    let gate = supervised(system_clock());
    assert!(matches!(
        gate.submit(submission(2, Value::Null)).unwrap(),
        Admission::AutoApproved
    ));

    let Admission::Pending(request) = gate
        .submit(submission(
            3,
            json!({ "target": "/etc/app", "db": { "password": "hunter2" }, "API_TOKEN": "t" }),
        ))
        .unwrap()
    else {
        panic!("risk 3 should need approval");
    };
    assert_eq!(request.state_snapshot["target"], "/etc/app");
    assert_eq!(request.state_snapshot["db"]["password"], REDACTED);
    assert_eq!(request.state_snapshot["API_TOKEN"], REDACTED);
    assert_eq!(
        request.timeout_at.as_micros() - request.requested_at.as_micros(),
        300_000_000
    );
}

#[tokio::test]
async fn test_closing_denies_everything_pending() {
    let gate = supervised(system_clock());
    let first = pending(&gate, 3);
    let second = pending(&gate, 4);
    gate.approve(second.id, "alice", None).await.unwrap();
    let third = pending(&gate, 5);

    gate.close();
    assert!(matches!(
        gate.submit(submission(4, Value::Null)),
        Err(ApprovalError::Closed)
    ));

    let denied = gate.deny_all_pending("shutting down").await.unwrap();
    let mut ids: Vec<_> = denied.iter().map(|r| r.id).collect();
    ids.sort();
    let mut expected = vec![first.id, third.id];
    expected.sort();
    assert_eq!(ids, expected);
    assert_eq!(gate.get(second.id).unwrap().status, ApprovalStatus::Approved);
    assert!(gate.pending().is_empty());
}
