//! Contract tests for `StateStore`.
//!
//! Every backend runs through the same suite. Any conforming implementation
//! must pass these.

use std::collections::VecDeque;

use arbiter_state::{
    BlacklistEntry, FileStateStore, MemoryStateStore, PendingCommit, ReputationRecord, StateStore,
    SurrealStateStore, ValidatorState, WorkerId,
};
use chrono::{TimeZone, Utc};

fn populated_state() -> ValidatorState {
    let mut state = ValidatorState {
        last_round: 42,
        last_committed_round: Some(30),
        pending_commit: Some(PendingCommit {
            round: 40,
            worker_ids: vec![WorkerId::new("w1"), WorkerId::new("w2")],
            weights: vec![0.75, 0.25],
        }),
        ..Default::default()
    };

    for (id, ema, window) in [
        ("w1", 71.5, vec![70.0, 73.0]),
        ("w2", 12.25, vec![12.25]),
    ] {
        let wid = WorkerId::new(id);
        state.reputations.insert(
            wid.clone(),
            ReputationRecord {
                worker_id: wid,
                ema_quality: ema,
                history_window: VecDeque::from(window),
                last_updated_round: 41,
            },
        );
    }

    let cheat = WorkerId::new("w3");
    state.blacklist.insert(
        cheat.clone(),
        BlacklistEntry {
            worker_id: cheat.clone(),
            reason: "cross_submission".into(),
            expires_at: Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap(),
        },
    );
    state.violations.insert(WorkerId::new("w2"), 2);
    state.selection.total_rounds = 42;
    state.selection.query_counts.insert(WorkerId::new("w1"), 30);
    state.selection.query_counts.insert(WorkerId::new("w2"), 12);
    state
}

async fn assert_fresh_store_loads_default(store: &dyn StateStore) {
    let state = store.load_state().await.unwrap();
    assert_eq!(state, ValidatorState::default(), "backend {}", store.backend());
}

async fn assert_round_trip(store: &dyn StateStore) {
    let state = populated_state();
    store.save_state(&state).await.unwrap();
    let loaded = store.load_state().await.unwrap();
    assert_eq!(loaded, state, "backend {}", store.backend());
}

async fn assert_save_replaces(store: &dyn StateStore) {
    store.save_state(&populated_state()).await.unwrap();

    let mut smaller = ValidatorState::default();
    let wid = WorkerId::new("w9");
    smaller.reputations.insert(
        wid.clone(),
        ReputationRecord {
            worker_id: wid,
            ema_quality: 5.0,
            history_window: VecDeque::from(vec![5.0]),
            last_updated_round: 1,
        },
    );
    smaller.last_round = 1;
    store.save_state(&smaller).await.unwrap();

    let loaded = store.load_state().await.unwrap();
    assert_eq!(loaded, smaller, "backend {}", store.backend());
    assert!(loaded.blacklist.is_empty());
}

async fn assert_empty_save_clears(store: &dyn StateStore) {
    store.save_state(&populated_state()).await.unwrap();
    store.save_state(&ValidatorState::default()).await.unwrap();
    let loaded = store.load_state().await.unwrap();
    assert!(loaded.is_empty(), "backend {}", store.backend());
}

async fn run_contract(make: impl Fn() -> std::pin::Pin<Box<dyn std::future::Future<Output = Box<dyn StateStore>>>>) {
    assert_fresh_store_loads_default(make().await.as_ref()).await;
    assert_round_trip(make().await.as_ref()).await;
    assert_save_replaces(make().await.as_ref()).await;
    assert_empty_save_clears(make().await.as_ref()).await;
}

#[tokio::test]
async fn memory_store_satisfies_contract() {
    run_contract(|| Box::pin(async { Box::new(MemoryStateStore::new()) as Box<dyn StateStore> }))
        .await;
}

#[tokio::test]
async fn file_store_satisfies_contract() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_path_buf();
    let counter = std::sync::atomic::AtomicUsize::new(0);
    run_contract(|| {
        let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let path = base.join(format!("state-{n}.json"));
        Box::pin(async move { Box::new(FileStateStore::new(path)) as Box<dyn StateStore> })
    })
    .await;
}

#[tokio::test]
async fn surreal_store_satisfies_contract() {
    run_contract(|| {
        Box::pin(async {
            Box::new(SurrealStateStore::in_memory().await.unwrap()) as Box<dyn StateStore>
        })
    })
    .await;
}

#[tokio::test]
async fn file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let state = populated_state();

    FileStateStore::new(&path).save_state(&state).await.unwrap();
    let reopened = FileStateStore::new(&path);
    assert_eq!(reopened.load_state().await.unwrap(), state);
}

#[tokio::test]
async fn memory_store_counts_saves() {
    let store = MemoryStateStore::new();
    store.save_state(&populated_state()).await.unwrap();
    store.save_state(&populated_state()).await.unwrap();
    assert_eq!(store.save_count(), 2);
}
