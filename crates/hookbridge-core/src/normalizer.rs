//! # Normalizer Registry
//!
//! Named strategies that turn a raw platform payload plus its HTTP headers
//! into a canonical [`Event`].
//!
//! Normalizers are pure transforms: no I/O, no mutation of inputs. The
//! transport layer lowercases header names before invoking a normalizer, so
//! every normalizer can rely on lowercase header lookups.
//!
//! Two registration shapes are supported. Most normalizers take
//! `(payload, headers)`; older payload-only normalizers are registered
//! through [`NormalizerRegistry::register_payload_only`], which wraps them
//! with an adapter discarding headers at registration time so there is no
//! per-request dispatch cost.

use crate::event::{Event, PropertyValue};
use crate::{HookError, ValidationError};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

// ============================================================================
// Types
// ============================================================================

/// HTTP headers as seen by a normalizer: keys lowercased by the transport.
pub type Headers = BTreeMap<String, String>;

/// A registered normalization strategy.
pub type Normalizer =
    Arc<dyn Fn(serde_json::Value, &Headers) -> Result<Event, NormalizeError> + Send + Sync>;

/// Errors produced inside a normalizer.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// ============================================================================
// NormalizerRegistry
// ============================================================================

/// Registry of named normalization strategies.
///
/// Built once at startup and used read-only during request handling; lookups
/// clone the `Arc`, never the closure.
///
/// # Examples
///
/// ```rust
/// use hookbridge_core::normalizer::NormalizerRegistry;
///
/// let mut registry = NormalizerRegistry::new();
/// registry.register_builtins();
/// assert!(registry.get("github").is_ok());
/// ```
#[derive(Clone, Default)]
pub struct NormalizerRegistry {
    normalizers: HashMap<String, Normalizer>,
}

impl NormalizerRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            normalizers: HashMap::new(),
        }
    }

    /// Register a `(payload, headers)` normalizer under `name`.
    ///
    /// Registering the same name twice replaces the previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, normalizer: F)
    where
        F: Fn(serde_json::Value, &Headers) -> Result<Event, NormalizeError>
            + Send
            + Sync
            + 'static,
    {
        self.normalizers.insert(name.into(), Arc::new(normalizer));
    }

    /// Register a payload-only normalizer under `name`.
    ///
    /// The closure is wrapped once at registration with an adapter that
    /// discards headers.
    pub fn register_payload_only<F>(&mut self, name: impl Into<String>, normalizer: F)
    where
        F: Fn(serde_json::Value) -> Result<Event, NormalizeError> + Send + Sync + 'static,
    {
        self.register(name, move |payload, _headers| normalizer(payload));
    }

    /// Look up a normalizer by name.
    ///
    /// # Errors
    ///
    /// Returns [`HookError::UnknownNormalizer`] when no normalizer is
    /// registered under `name`.
    pub fn get(&self, name: &str) -> Result<Normalizer, HookError> {
        self.normalizers
            .get(name)
            .cloned()
            .ok_or_else(|| HookError::UnknownNormalizer {
                name: name.to_string(),
            })
    }

    /// Check whether a normalizer is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.normalizers.contains_key(name)
    }

    /// Names of all registered normalizers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.normalizers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register the built-in normalizers. Currently: `github`.
    pub fn register_builtins(&mut self) {
        self.register("github", normalize_github);
    }
}

impl std::fmt::Debug for NormalizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizerRegistry")
            .field("normalizers", &self.names())
            .finish()
    }
}

// ============================================================================
// Built-in: GitHub
// ============================================================================

/// Normalize a GitHub webhook payload.
///
/// The event type comes from the `x-github-event` header, falling back to
/// `"unknown"` when absent. Extracted properties:
///
/// | Property | Source |
/// |---|---|
/// | `repo` | `repository.full_name` |
/// | `sender` | `sender.login` |
/// | `action` | `action` |
/// | `ref` | `ref` |
/// | `zen`, `hook_id` | `ping` events only |
///
/// The raw payload is carried through unchanged.
pub fn normalize_github(
    payload: serde_json::Value,
    headers: &Headers,
) -> Result<Event, NormalizeError> {
    let event_type = headers
        .get("x-github-event")
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    let mut properties = BTreeMap::new();

    if let Some(repo) = payload
        .get("repository")
        .and_then(|r| r.get("full_name"))
        .and_then(|v| v.as_str())
    {
        properties.insert("repo".to_string(), PropertyValue::from(repo));
    }

    if let Some(sender) = payload
        .get("sender")
        .and_then(|s| s.get("login"))
        .and_then(|v| v.as_str())
    {
        properties.insert("sender".to_string(), PropertyValue::from(sender));
    }

    if let Some(action) = payload.get("action").and_then(|v| v.as_str()) {
        properties.insert("action".to_string(), PropertyValue::from(action));
    }

    if let Some(git_ref) = payload.get("ref").and_then(|v| v.as_str()) {
        properties.insert("ref".to_string(), PropertyValue::from(git_ref));
    }

    if event_type == "ping" {
        if let Some(zen) = payload.get("zen").and_then(|v| v.as_str()) {
            properties.insert("zen".to_string(), PropertyValue::from(zen));
        }
        if let Some(hook_id) = payload.get("hook_id").and_then(|v| v.as_i64()) {
            properties.insert("hook_id".to_string(), PropertyValue::from(hook_id));
        }
    }

    let event = Event::new("github", event_type)?
        .with_properties(properties)
        .with_payload(payload);

    Ok(event)
}

#[cfg(test)]
#[path = "normalizer_tests.rs"]
mod tests;
