//! In-memory outbox store implementation for testing and development.
//!
//! Provides the full store semantics — deduplicated insert, atomic claim,
//! lease recovery — without durability. Intended for:
//! - Unit and integration testing of delivery consumers
//! - Development and prototyping
//! - Reference implementation for durable backends

use crate::entry::{
    EntryId, InsertOutcome, NewOutboxEntry, OutboxCounts, OutboxEntry, OutboxStatus, Timestamp,
};
use crate::error::OutboxError;
use crate::store::OutboxStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage
// ============================================================================

/// Entry table plus the `(contract_id, event_id)` dedup index.
#[derive(Default)]
struct EntryTable {
    entries: HashMap<EntryId, OutboxEntry>,
    by_pair: HashMap<(String, String), EntryId>,
}

// ============================================================================
// MemoryOutboxStore
// ============================================================================

/// In-memory [`OutboxStore`] implementation.
#[derive(Default)]
pub struct MemoryOutboxStore {
    table: RwLock<EntryTable>,
}

impl MemoryOutboxStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxStore for MemoryOutboxStore {
    async fn insert(&self, entry: NewOutboxEntry) -> Result<InsertOutcome, OutboxError> {
        let mut table = self.table.write().expect("outbox table poisoned");

        let pair = (entry.contract_id.clone(), entry.event_id.clone());
        if let Some(existing) = table.by_pair.get(&pair) {
            return Ok(InsertOutcome::AlreadyQueued(existing.clone()));
        }

        let row = entry.into_entry(Timestamp::now());
        let id = row.id.clone();
        table.by_pair.insert(pair, id.clone());
        table.entries.insert(id.clone(), row);

        Ok(InsertOutcome::Inserted(id))
    }

    async fn claim_due(&self, now: Timestamp) -> Result<Option<OutboxEntry>, OutboxError> {
        let mut table = self.table.write().expect("outbox table poisoned");

        // Oldest due entry by schedule, then by insertion.
        let due_id = table
            .entries
            .values()
            .filter(|e| e.is_due(now))
            .min_by_key(|e| (e.next_attempt_at, e.created_at, e.id.as_str().to_string()))
            .map(|e| e.id.clone());

        let Some(id) = due_id else {
            return Ok(None);
        };

        let entry = table
            .entries
            .get_mut(&id)
            .expect("claimed id disappeared under write lock");
        entry.status = OutboxStatus::InFlight;
        entry.attempts += 1;
        entry.claimed_at = Some(now);

        Ok(Some(entry.clone()))
    }

    async fn complete(&self, id: &EntryId) -> Result<(), OutboxError> {
        self.transition(id, OutboxStatus::Succeeded, None)
    }

    async fn reschedule(
        &self,
        id: &EntryId,
        next_attempt_at: Timestamp,
        error: &str,
    ) -> Result<(), OutboxError> {
        let mut table = self.table.write().expect("outbox table poisoned");
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| OutboxError::EntryNotFound {
                entry_id: id.to_string(),
            })?;

        expect_in_flight(entry)?;
        entry.status = OutboxStatus::Pending;
        entry.next_attempt_at = next_attempt_at;
        entry.last_error = Some(error.to_string());
        entry.claimed_at = None;
        Ok(())
    }

    async fn fail(&self, id: &EntryId, error: &str) -> Result<(), OutboxError> {
        self.transition(id, OutboxStatus::Failed, Some(error))
    }

    async fn dead_letter(&self, id: &EntryId, error: &str) -> Result<(), OutboxError> {
        self.transition(id, OutboxStatus::DeadLettered, Some(error))
    }

    async fn release_expired(
        &self,
        lease: Duration,
        now: Timestamp,
    ) -> Result<usize, OutboxError> {
        let mut table = self.table.write().expect("outbox table poisoned");

        let mut released = 0;
        for entry in table.entries.values_mut() {
            if entry.lease_expired(lease, now) {
                entry.status = OutboxStatus::Pending;
                entry.next_attempt_at = now;
                entry.claimed_at = None;
                released += 1;
            }
        }

        Ok(released)
    }

    async fn get(&self, id: &EntryId) -> Result<OutboxEntry, OutboxError> {
        let table = self.table.read().expect("outbox table poisoned");
        table
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| OutboxError::EntryNotFound {
                entry_id: id.to_string(),
            })
    }

    async fn list(&self, status: Option<OutboxStatus>) -> Result<Vec<OutboxEntry>, OutboxError> {
        let table = self.table.read().expect("outbox table poisoned");
        let mut entries: Vec<OutboxEntry> = table
            .entries
            .values()
            .filter(|e| status.map(|s| e.status == s).unwrap_or(true))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(entries)
    }

    async fn counts(&self) -> Result<OutboxCounts, OutboxError> {
        let table = self.table.read().expect("outbox table poisoned");
        let mut counts = OutboxCounts::default();
        for entry in table.entries.values() {
            match entry.status {
                OutboxStatus::Pending => counts.pending += 1,
                OutboxStatus::InFlight => counts.in_flight += 1,
                OutboxStatus::Succeeded => counts.succeeded += 1,
                OutboxStatus::Failed => counts.failed += 1,
                OutboxStatus::DeadLettered => counts.dead_lettered += 1,
            }
        }
        Ok(counts)
    }
}

impl MemoryOutboxStore {
    /// Shared terminal transition: only valid from `in_flight`.
    fn transition(
        &self,
        id: &EntryId,
        to: OutboxStatus,
        error: Option<&str>,
    ) -> Result<(), OutboxError> {
        let mut table = self.table.write().expect("outbox table poisoned");
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| OutboxError::EntryNotFound {
                entry_id: id.to_string(),
            })?;

        expect_in_flight(entry)?;
        entry.status = to;
        if let Some(error) = error {
            entry.last_error = Some(error.to_string());
        }
        entry.claimed_at = None;
        Ok(())
    }
}

/// Guard: delivery-outcome transitions only apply to claimed entries.
fn expect_in_flight(entry: &OutboxEntry) -> Result<(), OutboxError> {
    if entry.status != OutboxStatus::InFlight {
        return Err(OutboxError::InvalidTransition {
            entry_id: entry.id.to_string(),
            expected: OutboxStatus::InFlight.to_string(),
            actual: entry.status.to_string(),
        });
    }
    Ok(())
}
