//! Outbox entry types and core domain identifiers.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Unique identifier for outbox entries
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    /// Generate new random entry ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get entry ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "entry_id".to_string(),
            });
        }
        Ok(Self(s.to_string()))
    }
}

/// UTC timestamp used throughout the outbox runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Build from a chrono datetime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Parse from RFC3339 text
    pub fn from_rfc3339(s: &str) -> Result<Self, ValidationError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ValidationError::InvalidFormat {
                field: "timestamp".to_string(),
                message: format!("'{}' is not RFC3339", s),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Render as RFC3339 text
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying datetime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add a duration
    pub fn add_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 + chrono_duration)
    }

    /// Subtract a duration
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }

    /// Elapsed duration since another timestamp (zero when `other` is later)
    pub fn duration_since(&self, other: Self) -> Duration {
        self.0
            .signed_duration_since(other.0)
            .to_std()
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ============================================================================
// Outbox Status
// ============================================================================

/// Lifecycle state of an outbox entry.
///
/// Entries terminate in [`Succeeded`](Self::Succeeded),
/// [`Failed`](Self::Failed) (non-retryable 4xx) or
/// [`DeadLettered`](Self::DeadLettered) (retries exhausted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    DeadLettered,
}

impl OutboxStatus {
    /// Check whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::DeadLettered)
    }

    /// Stable string form used in logs and persistence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
        }
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Outbox Entry
// ============================================================================

/// Durable row tracking one pending external delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    /// Row identifier
    pub id: EntryId,

    /// Contract that produced this delivery
    pub contract_id: String,

    /// Event being delivered
    pub event_id: String,

    /// Insertion instant
    pub created_at: Timestamp,

    /// Lifecycle state
    pub status: OutboxStatus,

    /// Claim count so far
    pub attempts: u32,

    /// Earliest instant the entry is due for (re)delivery
    pub next_attempt_at: Timestamp,

    /// Short description of the most recent failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Instant of the most recent claim; drives lease recovery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<Timestamp>,

    /// Delivery destination
    pub url: String,

    /// HMAC signing secret for the delivery signature header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    /// Per-target request timeout
    pub timeout_ms: u64,

    /// Serialized event envelope posted to the target
    pub payload: serde_json::Value,
}

impl OutboxEntry {
    /// Check whether the entry is due for delivery at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.status == OutboxStatus::Pending && self.next_attempt_at <= now
    }

    /// Check whether an in-flight claim has outlived `lease` at `now`.
    pub fn lease_expired(&self, lease: Duration, now: Timestamp) -> bool {
        self.status == OutboxStatus::InFlight
            && self
                .claimed_at
                .map(|claimed| now.duration_since(claimed) >= lease)
                .unwrap_or(true)
    }

    /// Per-target request timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Request to insert a new delivery into the outbox.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEntry {
    pub contract_id: String,
    pub event_id: String,
    pub url: String,
    pub signing_secret: Option<String>,
    pub timeout: Duration,
    pub payload: serde_json::Value,
}

impl NewOutboxEntry {
    /// Materialize into a pending entry due immediately.
    pub fn into_entry(self, now: Timestamp) -> OutboxEntry {
        OutboxEntry {
            id: EntryId::new(),
            contract_id: self.contract_id,
            event_id: self.event_id,
            created_at: now,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            claimed_at: None,
            url: self.url,
            signing_secret: self.signing_secret,
            timeout_ms: self.timeout.as_millis() as u64,
            payload: self.payload,
        }
    }
}

/// Outcome of an insert: new row, or the existing row for the same
/// `(contract_id, event_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(EntryId),
    AlreadyQueued(EntryId),
}

impl InsertOutcome {
    /// The entry ID regardless of outcome.
    pub fn entry_id(&self) -> &EntryId {
        match self {
            Self::Inserted(id) | Self::AlreadyQueued(id) => id,
        }
    }
}

/// Per-status entry counts for the operational surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

impl OutboxCounts {
    /// Total number of tracked entries.
    pub fn total(&self) -> usize {
        self.pending + self.in_flight + self.succeeded + self.failed + self.dead_lettered
    }
}

#[cfg(test)]
#[path = "entry_tests.rs"]
mod tests;
