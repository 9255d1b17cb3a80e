//! Audit chain integrity: tamper detection and persistence across restarts.

#![allow(clippy::arithmetic_side_effects)]

use std::sync::Arc;

use bulwark_audit::{Actor, AuditEntry, AuditEvent, AuditLog, AuditOutcome, AuditRecord};
use bulwark_clock::ClockService;
use bulwark_core::{NodeId, PrincipalId};
use bulwark_crypto::KeyPair;
use bulwark_storage::{KvStore, MemoryKvStore, SurrealKvStore};
use proptest::prelude::*;

const NS_ENTRIES: &str = "audit:entries";

fn clock() -> Arc<ClockService> {
    Arc::new(ClockService::system(NodeId::new("it")))
}

fn record(n: usize) -> AuditRecord {
    AuditRecord::new(
        Actor::Principal(PrincipalId::new("agent")),
        AuditEvent::CapabilitiesVerified {
            capabilities: vec![format!("kv:read:/app/{n}")],
        },
    )
}

fn key(sequence: u64) -> String {
    format!("{sequence:020}")
}

#[derive(Debug, Clone, Copy)]
enum Tamper {
    FlipOutcome,
    Unlink,
    Delete,
}

async fn tamper(store: &Arc<dyn KvStore>, sequence: u64, how: Tamper) {
    let raw = store.get(NS_ENTRIES, &key(sequence)).await.unwrap().unwrap();
    let mut entry: AuditEntry = serde_json::from_slice(&raw).unwrap();
    match how {
        Tamper::FlipOutcome => entry.outcome = AuditOutcome::failure("rewritten"),
        Tamper::Unlink => entry.prior_hash = entry.entry_hash,
        Tamper::Delete => {
            store.delete(NS_ENTRIES, &key(sequence)).await.unwrap();
            return;
        },
    }
    store
        .set(NS_ENTRIES, &key(sequence), serde_json::to_vec(&entry).unwrap())
        .await
        .unwrap();
}

fn block_on<F: std::future::Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(f)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn untouched_chain_verifies(n in 0usize..40) {
        let verification = block_on(async {
            let log = AuditLog::in_memory(clock(), KeyPair::generate());
            for i in 0..n {
                log.append(record(i)).await.unwrap();
            }
            log.verify_chain(..).await.unwrap()
        });
        prop_assert!(verification.is_valid());
        prop_assert_eq!(verification.entries_verified, n as u64);
    }

    #[test]
    fn any_tampered_entry_is_the_first_divergence(
        n in 1u64..30,
        pick in any::<prop::sample::Index>(),
        how in prop_oneof![Just(Tamper::FlipOutcome), Just(Tamper::Unlink), Just(Tamper::Delete)],
    ) {
        let target = pick.index(n as usize) as u64 + 1;
        let verification = block_on(async {
            let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
            let log = AuditLog::open(Arc::clone(&store), clock(), KeyPair::generate())
                .await
                .unwrap();
            for i in 0..n {
                log.append(record(i as usize)).await.unwrap();
            }
            tamper(&store, target, how).await;
            log.verify_chain(..).await.unwrap()
        });
        prop_assert!(!verification.is_valid(), "{how:?} at #{target} went unnoticed");
        prop_assert_eq!(verification.entries_verified, target - 1);
    }
}

#[tokio::test]
async fn test_chain_continues_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("keys/runtime.key");

    let store = Arc::new(SurrealKvStore::open(dir.path().join("store")).unwrap());
    let log = AuditLog::open(
        Arc::clone(&store) as Arc<dyn KvStore>,
        clock(),
        KeyPair::load_or_generate(&key_path).unwrap(),
    )
    .await
    .unwrap();
    for i in 0..3 {
        log.append(record(i)).await.unwrap();
    }
    let head = log.head().await;
    drop(log);
    store.close().await.unwrap();
    drop(store);

    let store = Arc::new(SurrealKvStore::open(dir.path().join("store")).unwrap());
    let log = AuditLog::open(
        Arc::clone(&store) as Arc<dyn KvStore>,
        clock(),
        KeyPair::load_or_generate(&key_path).unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(log.head().await, head);

    let fourth = log.append(record(3)).await.unwrap();
    assert_eq!(fourth.sequence, 4);
    assert_eq!(fourth.prior_hash, head.hash);

    let verification = log.verify_chain(..).await.unwrap();
    assert!(verification.is_valid(), "{:?}", verification.issue);
    assert_eq!(verification.entries_verified, 4);

    let mut exported = Vec::new();
    assert_eq!(log.export_jsonl(&mut exported).await.unwrap(), 4);
    let lines: Vec<&str> = std::str::from_utf8(&exported).unwrap().lines().collect();
    assert_eq!(lines.len(), 4);
    let last: AuditEntry = serde_json::from_str(lines[3]).unwrap();
    assert_eq!(last.entry_hash, fourth.entry_hash);

    store.close().await.unwrap();
}

#[tokio::test]
async fn test_foreign_key_fails_verification() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
    let log = AuditLog::open(Arc::clone(&store), clock(), KeyPair::generate())
        .await
        .unwrap();
    log.append(record(0)).await.unwrap();
    drop(log);

    let impostor = AuditLog::open(store, clock(), KeyPair::generate())
        .await
        .unwrap();
    let verification = impostor.verify_chain(..).await.unwrap();
    assert!(!verification.is_valid());
    assert_eq!(verification.entries_verified, 0);
}

#[tokio::test]
async fn test_range_reads_follow_sequence() {
    let log = AuditLog::in_memory(clock(), KeyPair::generate());
    let mut stamps = Vec::new();
    for i in 0..6 {
        stamps.push(log.append(record(i)).await.unwrap().timestamp);
    }

    let middle = log.entries(2..=4).await.unwrap();
    assert_eq!(
        middle.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![2, 3, 4]
    );

    let window = log.entries_between(stamps[1], stamps[3]).await.unwrap();
    assert_eq!(
        window.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![2, 3]
    );

    let partial = log.verify_chain(3..).await.unwrap();
    assert!(partial.is_valid());
    assert_eq!(partial.entries_verified, 4);
}
