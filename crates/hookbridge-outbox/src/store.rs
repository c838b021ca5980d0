//! The [`OutboxStore`] trait: durable storage with atomic claim transitions.

use crate::entry::{
    EntryId, InsertOutcome, NewOutboxEntry, OutboxCounts, OutboxEntry, OutboxStatus, Timestamp,
};
use crate::error::OutboxError;
use async_trait::async_trait;
use std::time::Duration;

/// Durable storage for outbox entries.
///
/// The store is shared across delivery workers (and, for durable backends,
/// across processes). Every mutation of delivery state goes through the
/// atomic transitions below; workers never hold row state in memory across
/// attempts.
///
/// # State machine
///
/// | From | Operation | To |
/// |---|---|---|
/// | — | [`insert`](Self::insert) | `pending` |
/// | `pending` | [`claim_due`](Self::claim_due) | `in_flight`, `attempts += 1` |
/// | `in_flight` | [`complete`](Self::complete) | `succeeded` |
/// | `in_flight` | [`reschedule`](Self::reschedule) | `pending` |
/// | `in_flight` | [`fail`](Self::fail) | `failed` |
/// | `in_flight` | [`dead_letter`](Self::dead_letter) | `dead_lettered` |
/// | `in_flight` | [`release_expired`](Self::release_expired) | `pending` |
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new pending entry due immediately.
    ///
    /// Insertion is deduplicated per `(contract_id, event_id)`: when a
    /// non-terminal entry for the pair already exists, the existing row is
    /// reused and [`InsertOutcome::AlreadyQueued`] is returned.
    async fn insert(&self, entry: NewOutboxEntry) -> Result<InsertOutcome, OutboxError>;

    /// Atomically claim the oldest pending entry due at `now`.
    ///
    /// The claimed entry transitions to `in_flight` with `attempts`
    /// incremented and `claimed_at` stamped, so concurrent workers never
    /// deliver the same entry twice.
    async fn claim_due(&self, now: Timestamp) -> Result<Option<OutboxEntry>, OutboxError>;

    /// Mark an in-flight entry as delivered.
    async fn complete(&self, id: &EntryId) -> Result<(), OutboxError>;

    /// Return an in-flight entry to `pending`, scheduled at `next_attempt_at`.
    async fn reschedule(
        &self,
        id: &EntryId,
        next_attempt_at: Timestamp,
        error: &str,
    ) -> Result<(), OutboxError>;

    /// Terminally fail an in-flight entry (non-retryable client error).
    async fn fail(&self, id: &EntryId, error: &str) -> Result<(), OutboxError>;

    /// Dead-letter an in-flight entry (retries exhausted).
    async fn dead_letter(&self, id: &EntryId, error: &str) -> Result<(), OutboxError>;

    /// Return in-flight entries whose claim is older than `lease` to
    /// `pending`. This is the crash-recovery path; it runs at startup and
    /// periodically afterwards. Returns how many entries were released.
    async fn release_expired(&self, lease: Duration, now: Timestamp)
        -> Result<usize, OutboxError>;

    /// Fetch a single entry.
    async fn get(&self, id: &EntryId) -> Result<OutboxEntry, OutboxError>;

    /// List entries, optionally filtered by status, newest first.
    async fn list(&self, status: Option<OutboxStatus>) -> Result<Vec<OutboxEntry>, OutboxError>;

    /// Per-status entry counts.
    async fn counts(&self) -> Result<OutboxCounts, OutboxError>;
}
