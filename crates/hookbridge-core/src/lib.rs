//! # Hookbridge Core
//!
//! Core business logic for the hookbridge inbound hook service.
//!
//! This crate contains the domain logic for normalizing inbound webhook
//! payloads into canonical events, matching events against subscriber
//! contracts, and routing matches to in-process handlers and the delivery
//! outbox.
//!
//! ## Architecture
//!
//! The core follows clean architecture principles:
//! - Business logic depends only on trait abstractions
//! - Infrastructure implementations (HTTP, broker, storage) are injected
//! - All external dependencies are abstracted behind traits
//!
//! ## Usage
//!
//! ```rust
//! use hookbridge_core::{ContractId, EventId};
//!
//! // Core types are available for use across the system
//! let event_id = EventId::new();
//! let contract_id = ContractId::new("deploy-on-push").unwrap();
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

/// Standard result type for hookbridge operations
pub type HookResult<T> = Result<T, HookError>;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for canonical events.
///
/// Uses ULID for lexicographic sorting and global uniqueness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get string representation of event ID
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

/// Stable identifier for a subscriber contract.
///
/// Contract IDs come from configuration or programmatic registration and
/// must be unique within a registry. They appear in outbox rows and logs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    /// Create a new contract ID with validation.
    ///
    /// # Validation Rules
    /// - Must be 1-128 characters
    /// - Must contain only alphanumeric characters, hyphens, underscores,
    ///   and periods
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "contract_id".to_string(),
            });
        }

        if id.len() > 128 {
            return Err(ValidationError::TooLong {
                field: "contract_id".to_string(),
                max_length: 128,
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ValidationError::InvalidCharacters {
                field: "contract_id".to_string(),
                invalid_chars: "non-alphanumeric except hyphens, underscores, periods".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContractId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

/// Identity of one running hookbridge process.
///
/// Stamped as the `daemon_id` property on every event a process originates
/// so that the stream fan-out consumer can skip records this process
/// published itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaemonId(String);

impl DaemonId {
    /// Create a daemon ID from a configured value.
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "daemon_id".to_string(),
            });
        }
        Ok(Self(id))
    }

    /// Generate a fresh process-unique daemon ID.
    pub fn generate() -> Self {
        Self(format!("hb-{}", Uuid::new_v4()))
    }

    /// Get string representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DaemonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp with microsecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// Convert to RFC3339 string
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Add a duration to the timestamp
    pub fn add_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 + chrono_duration)
    }

    /// Add seconds to timestamp
    pub fn add_seconds(&self, seconds: u64) -> Self {
        self.add_duration(Duration::from_secs(seconds))
    }

    /// Subtract duration from timestamp
    pub fn subtract_duration(&self, duration: Duration) -> Self {
        let chrono_duration = chrono::Duration::from_std(duration).unwrap_or_default();
        Self(self.0 - chrono_duration)
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> Duration {
        let chrono_duration = self.0.signed_duration_since(other.0);
        chrono_duration.to_std().unwrap_or_default()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Error type for input validation failures
#[derive(Debug, Clone, thiserror::Error, Serialize, Deserialize)]
pub enum ValidationError {
    #[error("Field '{field}' is required")]
    Required { field: String },

    #[error("Field '{field}' has invalid format: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    TooLong { field: String, max_length: usize },

    #[error("Field '{field}' contains invalid characters: {invalid_chars}")]
    InvalidCharacters {
        field: String,
        invalid_chars: String,
    },
}

/// Error type for string parsing failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },
}

/// Top-level error taxonomy consumed across the hook core.
///
/// The variants split into three classes:
/// - client errors that surface to the HTTP caller
///   ([`InvalidPayload`](Self::InvalidPayload),
///   [`InvalidSignature`](Self::InvalidSignature),
///   [`MissingSignature`](Self::MissingSignature),
///   [`UnknownNormalizer`](Self::UnknownNormalizer),
///   [`NormalizerFailed`](Self::NormalizerFailed))
/// - local failures that are logged but never block inbound acceptance
///   ([`NoMatchingContract`](Self::NoMatchingContract),
///   [`HandlerFailed`](Self::HandlerFailed))
/// - delivery failures owned by the outbox
///   ([`DeliveryFailed`](Self::DeliveryFailed))
#[derive(Debug, thiserror::Error)]
pub enum HookError {
    #[error("Invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Signature header missing but a secret is configured")]
    MissingSignature,

    #[error("Unknown normalizer: {name}")]
    UnknownNormalizer { name: String },

    #[error("Normalizer '{name}' failed: {message}")]
    NormalizerFailed { name: String, message: String },

    #[error("No contract matched event {event_id}")]
    NoMatchingContract { event_id: EventId },

    #[error("Handler '{handler}' failed after {attempts} attempts: {message}")]
    HandlerFailed {
        handler: String,
        attempts: u32,
        message: String,
    },

    #[error("Delivery failed: {message}")]
    DeliveryFailed { message: String },

    #[error("Invalid envelope: {message}")]
    InvalidEnvelope { message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl HookError {
    /// Short stable kind string used in HTTP error bodies and logs.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "InvalidPayload",
            Self::InvalidSignature => "InvalidSignature",
            Self::MissingSignature => "MissingSignature",
            Self::UnknownNormalizer { .. } => "UnknownNormalizer",
            Self::NormalizerFailed { .. } => "NormalizerFailed",
            Self::NoMatchingContract { .. } => "NoMatchingContract",
            Self::HandlerFailed { .. } => "HandlerFailed",
            Self::DeliveryFailed { .. } => "DeliveryFailed",
            Self::InvalidEnvelope { .. } => "InvalidEnvelope",
            Self::Validation(_) => "ValidationError",
        }
    }

    /// Check if this error should surface to the HTTP caller.
    ///
    /// Non-client errors are logged and never block inbound acceptance.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload { .. }
                | Self::InvalidSignature
                | Self::MissingSignature
                | Self::UnknownNormalizer { .. }
                | Self::NormalizerFailed { .. }
                | Self::Validation(_)
        )
    }
}

// ============================================================================
// Module declarations
// ============================================================================

/// Canonical event envelope and stream record codec
pub mod event;

/// Named payload-to-event normalization strategies
pub mod normalizer;

/// Subscriber contracts and criterion matching
pub mod contract;

/// In-memory + persisted contract registry
pub mod registry;

/// Configuration document shared between core and service layers
pub mod config;

/// Central event dispatcher
pub mod dispatch;

/// In-process handler registry and executor
pub mod handler;

// Re-export key types for convenience
pub use config::{ContractDef, CriterionDef, HookConfig, InboundSourceDef, TargetDef};
pub use contract::{Contract, ContractOrigin, ContractTarget, PropertyCriterion};
pub use dispatch::{DispatchResult, Dispatcher};
pub use event::{Event, PropertyValue};
pub use handler::{HandlerError, HandlerExecutor, HandlerRegistry};
pub use normalizer::{NormalizeError, NormalizerRegistry};
pub use registry::{ContractRegistry, ContractStore, FsContractStore};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
