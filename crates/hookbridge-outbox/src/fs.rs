//! Filesystem outbox store: one JSON file per entry under a root directory.
//!
//! Entries survive process restarts; the in-memory table rebuilt at open
//! time is the claim-coordination point, files are the durability point.
//! Every mutation is written with the write-then-rename pattern before the
//! store reports success, so a crash between claim and completion leaves an
//! `in_flight` file on disk that [`release_expired`](crate::OutboxStore::release_expired)
//! returns to `pending` at the next startup.
//!
//! Cross-process deployments should back [`OutboxStore`] with a shared
//! database instead; this implementation coordinates claims within one
//! process only.

use crate::entry::{
    EntryId, InsertOutcome, NewOutboxEntry, OutboxCounts, OutboxEntry, OutboxStatus, Timestamp,
};
use crate::error::OutboxError;
use crate::store::OutboxStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[cfg(test)]
#[path = "fs_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage
// ============================================================================

struct EntryTable {
    entries: HashMap<EntryId, OutboxEntry>,
    by_pair: HashMap<(String, String), EntryId>,
}

// ============================================================================
// FsOutboxStore
// ============================================================================

/// Filesystem-backed [`OutboxStore`].
///
/// # Examples
///
/// ```no_run
/// use hookbridge_outbox::FsOutboxStore;
/// use std::path::PathBuf;
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = FsOutboxStore::open(PathBuf::from("./data/outbox")).await?;
/// # Ok(())
/// # }
/// ```
pub struct FsOutboxStore {
    base_path: PathBuf,
    table: Mutex<EntryTable>,
}

impl FsOutboxStore {
    /// Open the store, creating the directory if needed and loading every
    /// entry file found there. Unreadable files are skipped with a warning.
    pub async fn open(base_path: PathBuf) -> Result<Self, OutboxError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| OutboxError::StorageFailed {
                message: format!("Failed to create outbox dir: {}", e),
            })?;

        let mut entries = HashMap::new();
        let mut by_pair = HashMap::new();

        let mut dir = fs::read_dir(&base_path)
            .await
            .map_err(|e| OutboxError::StorageFailed {
                message: format!("Failed to read outbox dir: {}", e),
            })?;

        while let Some(dirent) =
            dir.next_entry()
                .await
                .map_err(|e| OutboxError::StorageFailed {
                    message: format!("Failed to iterate outbox dir: {}", e),
                })?
        {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let text = match fs::read_to_string(&path).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable outbox file");
                    continue;
                }
            };

            match serde_json::from_str::<OutboxEntry>(&text) {
                Ok(entry) => {
                    by_pair.insert(
                        (entry.contract_id.clone(), entry.event_id.clone()),
                        entry.id.clone(),
                    );
                    entries.insert(entry.id.clone(), entry);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping corrupt outbox file");
                }
            }
        }

        Ok(Self {
            base_path,
            table: Mutex::new(EntryTable { entries, by_pair }),
        })
    }

    fn entry_path(&self, id: &EntryId) -> PathBuf {
        self.base_path.join(format!("{}.json", id))
    }

    /// Persist one entry with the write-then-rename pattern.
    async fn persist(&self, entry: &OutboxEntry) -> Result<(), OutboxError> {
        let json =
            serde_json::to_string_pretty(entry).map_err(|e| OutboxError::SerializationFailed {
                message: e.to_string(),
            })?;

        let final_path = self.entry_path(&entry.id);
        let temp_path = final_path.with_extension("tmp");

        let mut file =
            fs::File::create(&temp_path)
                .await
                .map_err(|e| OutboxError::StorageFailed {
                    message: format!("Failed to create temp file: {}", e),
                })?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| OutboxError::StorageFailed {
                message: format!("Failed to write entry: {}", e),
            })?;
        file.flush().await.map_err(|e| OutboxError::StorageFailed {
            message: format!("Failed to flush entry: {}", e),
        })?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| OutboxError::StorageFailed {
                message: format!("Failed to finalize entry: {}", e),
            })
    }

    /// Apply a delivery-outcome transition under the table lock and persist.
    async fn transition(
        &self,
        id: &EntryId,
        to: OutboxStatus,
        next_attempt_at: Option<Timestamp>,
        error: Option<&str>,
    ) -> Result<(), OutboxError> {
        let mut table = self.table.lock().await;
        let entry = table
            .entries
            .get_mut(id)
            .ok_or_else(|| OutboxError::EntryNotFound {
                entry_id: id.to_string(),
            })?;

        if entry.status != OutboxStatus::InFlight {
            return Err(OutboxError::InvalidTransition {
                entry_id: entry.id.to_string(),
                expected: OutboxStatus::InFlight.to_string(),
                actual: entry.status.to_string(),
            });
        }

        entry.status = to;
        if let Some(next) = next_attempt_at {
            entry.next_attempt_at = next;
        }
        if let Some(error) = error {
            entry.last_error = Some(error.to_string());
        }
        entry.claimed_at = None;

        let snapshot = entry.clone();
        drop(table);
        self.persist(&snapshot).await
    }
}

#[async_trait]
impl OutboxStore for FsOutboxStore {
    async fn insert(&self, entry: NewOutboxEntry) -> Result<InsertOutcome, OutboxError> {
        let mut table = self.table.lock().await;

        let pair = (entry.contract_id.clone(), entry.event_id.clone());
        if let Some(existing) = table.by_pair.get(&pair) {
            return Ok(InsertOutcome::AlreadyQueued(existing.clone()));
        }

        let row = entry.into_entry(Timestamp::now());
        let id = row.id.clone();
        table.by_pair.insert(pair, id.clone());
        table.entries.insert(id.clone(), row.clone());
        drop(table);

        self.persist(&row).await?;
        Ok(InsertOutcome::Inserted(id))
    }

    async fn claim_due(&self, now: Timestamp) -> Result<Option<OutboxEntry>, OutboxError> {
        let mut table = self.table.lock().await;

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
            .expect("claimed id disappeared under table lock");
        entry.status = OutboxStatus::InFlight;
        entry.attempts += 1;
        entry.claimed_at = Some(now);

        let snapshot = entry.clone();
        drop(table);

        self.persist(&snapshot).await?;
        Ok(Some(snapshot))
    }

    async fn complete(&self, id: &EntryId) -> Result<(), OutboxError> {
        self.transition(id, OutboxStatus::Succeeded, None, None).await
    }

    async fn reschedule(
        &self,
        id: &EntryId,
        next_attempt_at: Timestamp,
        error: &str,
    ) -> Result<(), OutboxError> {
        self.transition(id, OutboxStatus::Pending, Some(next_attempt_at), Some(error))
            .await
    }

    async fn fail(&self, id: &EntryId, error: &str) -> Result<(), OutboxError> {
        self.transition(id, OutboxStatus::Failed, None, Some(error))
            .await
    }

    async fn dead_letter(&self, id: &EntryId, error: &str) -> Result<(), OutboxError> {
        self.transition(id, OutboxStatus::DeadLettered, None, Some(error))
            .await
    }

    async fn release_expired(
        &self,
        lease: Duration,
        now: Timestamp,
    ) -> Result<usize, OutboxError> {
        let mut snapshots = Vec::new();
        {
            let mut table = self.table.lock().await;
            for entry in table.entries.values_mut() {
                if entry.lease_expired(lease, now) {
                    entry.status = OutboxStatus::Pending;
                    entry.next_attempt_at = now;
                    entry.claimed_at = None;
                    snapshots.push(entry.clone());
                }
            }
        }

        for snapshot in &snapshots {
            self.persist(snapshot).await?;
        }

        Ok(snapshots.len())
    }

    async fn get(&self, id: &EntryId) -> Result<OutboxEntry, OutboxError> {
        let table = self.table.lock().await;
        table
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| OutboxError::EntryNotFound {
                entry_id: id.to_string(),
            })
    }

    async fn list(&self, status: Option<OutboxStatus>) -> Result<Vec<OutboxEntry>, OutboxError> {
        let table = self.table.lock().await;
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
        let table = self.table.lock().await;
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
