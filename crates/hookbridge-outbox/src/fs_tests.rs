//! Tests for the filesystem outbox store, focused on durability across
//! re-opens.

use super::*;
use crate::store::OutboxStore;
use std::time::Duration;

// ============================================================================
// Helpers
// ============================================================================

fn new_entry(contract_id: &str, event_id: &str) -> NewOutboxEntry {
    NewOutboxEntry {
        contract_id: contract_id.to_string(),
        event_id: event_id.to_string(),
        url: "https://example.test/hook".to_string(),
        signing_secret: Some("k".to_string()),
        timeout: Duration::from_secs(10),
        payload: serde_json::json!({"type": "push"}),
    }
}

// ============================================================================
// Durability
// ============================================================================

#[tokio::test]
async fn test_entries_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
        store.insert(new_entry("c1", "e1")).await.unwrap();
        store.insert(new_entry("c1", "e2")).await.unwrap();
    }

    let reopened = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
    let counts = reopened.counts().await.unwrap();

    assert_eq!(counts.pending, 2);
}

#[tokio::test]
async fn test_dedup_index_rebuilt_on_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let store = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
        store.insert(new_entry("c1", "e1")).await.unwrap();
    }

    let reopened = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
    let outcome = reopened.insert(new_entry("c1", "e1")).await.unwrap();

    assert!(matches!(outcome, InsertOutcome::AlreadyQueued(_)));
    assert_eq!(reopened.counts().await.unwrap().total(), 1);
}

#[tokio::test]
async fn test_in_flight_entry_recovered_after_crash() {
    let dir = tempfile::tempdir().unwrap();

    // Simulated crash: entry claimed but never completed, store dropped.
    {
        let store = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
        store.insert(new_entry("c1", "e1")).await.unwrap();
        store.claim_due(Timestamp::now()).await.unwrap().unwrap();
    }

    let reopened = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
    assert_eq!(reopened.counts().await.unwrap().in_flight, 1);

    let released = reopened
        .release_expired(Duration::ZERO, Timestamp::now())
        .await
        .unwrap();
    assert_eq!(released, 1);

    let claimed = reopened.claim_due(Timestamp::now()).await.unwrap().unwrap();
    assert_eq!(claimed.attempts, 2);
}

#[tokio::test]
async fn test_terminal_state_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let id;

    {
        let store = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
        store.insert(new_entry("c1", "e1")).await.unwrap();
        let claimed = store.claim_due(Timestamp::now()).await.unwrap().unwrap();
        id = claimed.id.clone();
        store.complete(&id).await.unwrap();
    }

    let reopened = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
    let entry = reopened.get(&id).await.unwrap();

    assert_eq!(entry.status, OutboxStatus::Succeeded);
}

#[tokio::test]
async fn test_corrupt_file_skipped_on_open() {
    let dir = tempfile::tempdir().unwrap();
    tokio::fs::write(dir.path().join("broken.json"), "{not json")
        .await
        .unwrap();

    let store = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();
    assert_eq!(store.counts().await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_claim_semantics_match_memory_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsOutboxStore::open(dir.path().to_path_buf()).await.unwrap();

    store.insert(new_entry("c1", "e1")).await.unwrap();

    let now = Timestamp::now();
    let claimed = store.claim_due(now).await.unwrap().unwrap();
    assert_eq!(claimed.status, OutboxStatus::InFlight);
    assert!(store.claim_due(now).await.unwrap().is_none());

    store
        .reschedule(&claimed.id, now.add_duration(Duration::from_secs(30)), "x")
        .await
        .unwrap();
    assert!(store.claim_due(now).await.unwrap().is_none());
    assert!(store
        .claim_due(now.add_duration(Duration::from_secs(31)))
        .await
        .unwrap()
        .is_some());
}
