//! # Event Model
//!
//! The canonical event envelope shared by every component of the hook core,
//! plus the flat string-record codec used for broker stream transport.
//!
//! An [`Event`] is immutable once constructed: the ingress layer builds it
//! (directly or through a normalizer), stamps `event_id` and `timestamp`,
//! and every downstream consumer treats it as a value.

use crate::{EventId, HookError, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Property Values
// ============================================================================

/// Scalar value stored under a property key.
///
/// Properties are the only part of an event that contract criteria inspect,
/// so they are restricted to small scalar values. Nested structures belong
/// in `payload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl PropertyValue {
    /// Render the value as the string form used for criterion matching.
    ///
    /// Criteria are written as strings in configuration, so integers and
    /// booleans match against their canonical textual rendition
    /// (`42`, `true`).
    pub fn as_match_str(&self) -> Cow<'_, str> {
        match self {
            Self::String(s) => Cow::Borrowed(s.as_str()),
            Self::Integer(i) => Cow::Owned(i.to_string()),
            Self::Float(f) => Cow::Owned(f.to_string()),
            Self::Bool(b) => Cow::Owned(b.to_string()),
        }
    }

    /// Get the string value if this property is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Build a property value from a JSON scalar, rejecting non-scalars.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Self::Integer(i))
                } else {
                    n.as_f64().map(Self::Float)
                }
            }
            serde_json::Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_match_str())
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

// ============================================================================
// Event Envelope
// ============================================================================

/// Reserved keys of the flat stream record. Anything else round-trips
/// through the `extra` bucket.
const RECORD_EVENT_ID: &str = "event_id";
const RECORD_SOURCE: &str = "source";
const RECORD_TYPE: &str = "type";
const RECORD_TIMESTAMP: &str = "timestamp";
const RECORD_IDEMPOTENCY_KEY: &str = "idempotency_key";
const RECORD_PROPERTIES: &str = "properties";
const RECORD_PAYLOAD: &str = "payload";

/// Canonical internal representation of an inbound or inter-process signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier, generated at normalization time
    pub event_id: EventId,

    /// Origin family, e.g. `github`, `whatsapp`, `deployment`
    pub source: String,

    /// Dotted event-type string within the source, e.g. `push`,
    /// `message.received`. Never contains a wildcard.
    pub event_type: String,

    /// Instant assigned at normalization
    pub timestamp: Timestamp,

    /// Scalar properties used for contract matching
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,

    /// Opaque JSON body, passed through unchanged to handlers and targets
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Optional deduplication key for the handler executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Unknown stream record keys, carried so the codec is lossless
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Event {
    /// Create a new event with a fresh `event_id` and `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] when `source` or `event_type` is empty or
    /// contains characters outside `[a-z0-9._-]`.
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let source = source.into();
        let event_type = event_type.into();

        validate_token("source", &source)?;
        validate_token("type", &event_type)?;

        Ok(Self {
            event_id: EventId::new(),
            source,
            event_type,
            timestamp: Timestamp::now(),
            properties: BTreeMap::new(),
            payload: serde_json::Value::Null,
            idempotency_key: None,
            extra: BTreeMap::new(),
        })
    }

    /// Attach matching properties (builder style).
    pub fn with_properties(mut self, properties: BTreeMap<String, PropertyValue>) -> Self {
        self.properties = properties;
        self
    }

    /// Attach the opaque payload (builder style).
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Attach an idempotency key (builder style).
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Set a single property in place.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Look up a property by key.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Look up a property and render it as its matching string.
    pub fn property_str(&self, key: &str) -> Option<Cow<'_, str>> {
        self.properties.get(key).map(|v| v.as_match_str())
    }

    /// Encode the event as a flat string-keyed map for broker transport.
    ///
    /// Nested `properties` and `payload` are JSON-encoded under reserved
    /// keys; `extra` keys are written back verbatim.
    pub fn to_stream_record(&self) -> BTreeMap<String, String> {
        let mut record = BTreeMap::new();

        // Extra keys first so reserved keys always win on collision.
        for (key, value) in &self.extra {
            record.insert(key.clone(), value.clone());
        }

        record.insert(RECORD_EVENT_ID.to_string(), self.event_id.to_string());
        record.insert(RECORD_SOURCE.to_string(), self.source.clone());
        record.insert(RECORD_TYPE.to_string(), self.event_type.clone());
        record.insert(RECORD_TIMESTAMP.to_string(), self.timestamp.to_rfc3339());
        if let Some(key) = &self.idempotency_key {
            record.insert(RECORD_IDEMPOTENCY_KEY.to_string(), key.clone());
        }
        record.insert(
            RECORD_PROPERTIES.to_string(),
            serde_json::to_string(&self.properties).unwrap_or_else(|_| "{}".to_string()),
        );
        record.insert(
            RECORD_PAYLOAD.to_string(),
            serde_json::to_string(&self.payload).unwrap_or_else(|_| "null".to_string()),
        );

        record
    }

    /// Decode an event from a flat stream record.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::InvalidEnvelope`] when required keys are missing
    /// or the JSON-encoded fields are malformed.
    pub fn from_stream_record(record: &BTreeMap<String, String>) -> Result<Self, HookError> {
        let required = |key: &str| -> Result<&String, HookError> {
            record.get(key).ok_or_else(|| HookError::InvalidEnvelope {
                message: format!("missing required key '{}'", key),
            })
        };

        let event_id =
            required(RECORD_EVENT_ID)?
                .parse::<EventId>()
                .map_err(|e| HookError::InvalidEnvelope {
                    message: format!("bad event_id: {}", e),
                })?;

        let source = required(RECORD_SOURCE)?.clone();
        let event_type = required(RECORD_TYPE)?.clone();

        let timestamp = Timestamp::from_rfc3339(required(RECORD_TIMESTAMP)?).map_err(|e| {
            HookError::InvalidEnvelope {
                message: format!("bad timestamp: {}", e),
            }
        })?;

        let properties: BTreeMap<String, PropertyValue> =
            serde_json::from_str(required(RECORD_PROPERTIES)?).map_err(|e| {
                HookError::InvalidEnvelope {
                    message: format!("bad properties JSON: {}", e),
                }
            })?;

        let payload: serde_json::Value = serde_json::from_str(required(RECORD_PAYLOAD)?)
            .map_err(|e| HookError::InvalidEnvelope {
                message: format!("bad payload JSON: {}", e),
            })?;

        let idempotency_key = record.get(RECORD_IDEMPOTENCY_KEY).cloned();

        let reserved = [
            RECORD_EVENT_ID,
            RECORD_SOURCE,
            RECORD_TYPE,
            RECORD_TIMESTAMP,
            RECORD_IDEMPOTENCY_KEY,
            RECORD_PROPERTIES,
            RECORD_PAYLOAD,
        ];
        let extra: BTreeMap<String, String> = record
            .iter()
            .filter(|(k, _)| !reserved.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            event_id,
            source,
            event_type,
            timestamp,
            properties,
            payload,
            idempotency_key,
            extra,
        })
    }
}

/// Validate a source or type token: non-empty, `[a-z0-9._-]` only.
fn validate_token(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.' || c == '_' || c == '-')
    {
        return Err(ValidationError::InvalidCharacters {
            field: field.to_string(),
            invalid_chars: "characters outside [a-z0-9._-]".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
