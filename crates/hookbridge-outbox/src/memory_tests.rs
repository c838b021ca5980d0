//! Tests for the in-memory outbox store.

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
        signing_secret: None,
        timeout: Duration::from_secs(10),
        payload: serde_json::json!({"type": "push"}),
    }
}

// ============================================================================
// Insert and dedup
// ============================================================================

mod insert_tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_creates_pending_entry() {
        let store = MemoryOutboxStore::new();

        let outcome = store.insert(new_entry("c1", "e1")).await.unwrap();
        let id = match outcome {
            InsertOutcome::Inserted(id) => id,
            other => panic!("expected Inserted, got {:?}", other),
        };

        let entry = store.get(&id).await.unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.attempts, 0);
    }

    #[tokio::test]
    async fn test_duplicate_pair_reuses_existing_row() {
        let store = MemoryOutboxStore::new();

        let first = store.insert(new_entry("c1", "e1")).await.unwrap();
        let second = store.insert(new_entry("c1", "e1")).await.unwrap();

        assert!(matches!(second, InsertOutcome::AlreadyQueued(_)));
        assert_eq!(first.entry_id(), second.entry_id());
        assert_eq!(store.counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_same_event_different_contract_gets_own_row() {
        let store = MemoryOutboxStore::new();

        store.insert(new_entry("c1", "e1")).await.unwrap();
        store.insert(new_entry("c2", "e1")).await.unwrap();

        assert_eq!(store.counts().await.unwrap().total(), 2);
    }
}

// ============================================================================
// Claiming
// ============================================================================

mod claim_tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_transitions_to_in_flight_and_increments_attempts() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();

        let claimed = store.claim_due(Timestamp::now()).await.unwrap().unwrap();

        assert_eq!(claimed.status, OutboxStatus::InFlight);
        assert_eq!(claimed.attempts, 1);
        assert!(claimed.claimed_at.is_some());
    }

    #[tokio::test]
    async fn test_claimed_entry_cannot_be_claimed_again() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();

        let now = Timestamp::now();
        assert!(store.claim_due(now).await.unwrap().is_some());
        assert!(store.claim_due(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_returns_earliest_scheduled_first() {
        let store = MemoryOutboxStore::new();
        let now = Timestamp::now();

        store.insert(new_entry("c1", "e1")).await.unwrap();
        store.insert(new_entry("c1", "e2")).await.unwrap();

        // Reschedule one entry well before the other.
        let claimed = store.claim_due(now).await.unwrap().unwrap();
        store
            .reschedule(&claimed.id, now.subtract_duration(Duration::from_secs(60)), "x")
            .await
            .unwrap();

        // The earlier-scheduled entry wins the next claim.
        let reclaimed = store.claim_due(now).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, claimed.id);
        assert_eq!(reclaimed.attempts, 2);
    }

    #[tokio::test]
    async fn test_future_scheduled_entry_not_claimed() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();

        let now = Timestamp::now();
        let claimed = store.claim_due(now).await.unwrap().unwrap();
        store
            .reschedule(&claimed.id, now.add_duration(Duration::from_secs(300)), "later")
            .await
            .unwrap();

        assert!(store.claim_due(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_claim_on_empty_store_returns_none() {
        let store = MemoryOutboxStore::new();
        assert!(store.claim_due(Timestamp::now()).await.unwrap().is_none());
    }
}

// ============================================================================
// Transitions
// ============================================================================

mod transition_tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_marks_succeeded() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();
        let claimed = store.claim_due(Timestamp::now()).await.unwrap().unwrap();

        store.complete(&claimed.id).await.unwrap();

        let entry = store.get(&claimed.id).await.unwrap();
        assert_eq!(entry.status, OutboxStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_reschedule_returns_to_pending_with_error() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();
        let now = Timestamp::now();
        let claimed = store.claim_due(now).await.unwrap().unwrap();

        let next = now.add_duration(Duration::from_secs(30));
        store
            .reschedule(&claimed.id, next, "server_error: 503")
            .await
            .unwrap();

        let entry = store.get(&claimed.id).await.unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.next_attempt_at, next);
        assert_eq!(entry.last_error.as_deref(), Some("server_error: 503"));
        assert!(entry.claimed_at.is_none());
    }

    #[tokio::test]
    async fn test_fail_and_dead_letter_are_terminal() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();
        store.insert(new_entry("c1", "e2")).await.unwrap();

        let now = Timestamp::now();
        let first = store.claim_due(now).await.unwrap().unwrap();
        store.fail(&first.id, "client_error: 404").await.unwrap();

        let second = store.claim_due(now).await.unwrap().unwrap();
        store
            .dead_letter(&second.id, "retries exhausted")
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.dead_lettered, 1);

        // Terminal entries are never claimed again.
        assert!(store.claim_due(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_transition_from_pending_is_rejected() {
        let store = MemoryOutboxStore::new();
        let outcome = store.insert(new_entry("c1", "e1")).await.unwrap();

        let result = store.complete(outcome.entry_id()).await;
        assert!(matches!(result, Err(OutboxError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_transition_on_unknown_entry_fails() {
        let store = MemoryOutboxStore::new();
        let result = store.complete(&EntryId::new()).await;
        assert!(matches!(result, Err(OutboxError::EntryNotFound { .. })));
    }
}

// ============================================================================
// Lease recovery
// ============================================================================

mod lease_tests {
    use super::*;

    #[tokio::test]
    async fn test_expired_lease_released_to_pending() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();

        let claim_time = Timestamp::now();
        let claimed = store.claim_due(claim_time).await.unwrap().unwrap();

        let later = claim_time.add_duration(Duration::from_secs(120));
        let released = store
            .release_expired(Duration::from_secs(60), later)
            .await
            .unwrap();

        assert_eq!(released, 1);
        let entry = store.get(&claimed.id).await.unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        // Attempts survive the release so backoff keeps escalating.
        assert_eq!(entry.attempts, 1);
    }

    #[tokio::test]
    async fn test_fresh_lease_not_released() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();

        let now = Timestamp::now();
        store.claim_due(now).await.unwrap().unwrap();

        let released = store
            .release_expired(Duration::from_secs(60), now)
            .await
            .unwrap();

        assert_eq!(released, 0);
    }
}

// ============================================================================
// Listing
// ============================================================================

mod list_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = MemoryOutboxStore::new();
        store.insert(new_entry("c1", "e1")).await.unwrap();
        store.insert(new_entry("c1", "e2")).await.unwrap();

        let claimed = store.claim_due(Timestamp::now()).await.unwrap().unwrap();
        store.complete(&claimed.id).await.unwrap();

        let pending = store.list(Some(OutboxStatus::Pending)).await.unwrap();
        let succeeded = store.list(Some(OutboxStatus::Succeeded)).await.unwrap();
        let all = store.list(None).await.unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(succeeded.len(), 1);
        assert_eq!(all.len(), 2);
    }
}
