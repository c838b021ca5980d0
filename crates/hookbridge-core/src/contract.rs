//! # Subscriber Contracts
//!
//! A contract is an immutable subscription record: criteria that select
//! events plus a target that receives the matches. Matching is pure and
//! case-sensitive; all criteria in a contract must hold (implicit AND).

use crate::event::Event;
use crate::{ContractId, Timestamp, ValidationError};
use std::time::Duration;
use url::Url;

// ============================================================================
// Property Criterion
// ============================================================================

/// A single matching criterion applied to `source`, `type`, or one property.
///
/// Wildcard subscriptions are intentionally unsupported: a family of dotted
/// event types is expressed as [`PropertyCriterion::AnyOf`] with the types
/// enumerated, which keeps matching trivially fast and auditable.
#[derive(Debug, Clone)]
pub enum PropertyCriterion {
    /// Value must equal the given string exactly.
    Exact(String),

    /// Value must equal one of the given strings.
    AnyOf(Vec<String>),

    /// Value must match the given regular expression (unanchored search).
    Regex(regex::Regex),
}

impl PropertyCriterion {
    /// Compile a regex criterion.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidFormat`] when the pattern does not
    /// compile.
    pub fn regex(pattern: &str) -> Result<Self, ValidationError> {
        let compiled = regex::Regex::new(pattern).map_err(|e| ValidationError::InvalidFormat {
            field: "regex".to_string(),
            message: e.to_string(),
        })?;
        Ok(Self::Regex(compiled))
    }

    /// Check whether the criterion matches a present value.
    ///
    /// Matching is case-sensitive. An absent property never reaches this
    /// method; the contract fails the match instead.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(expected) => value == expected,
            Self::AnyOf(options) => options.iter().any(|o| o == value),
            Self::Regex(pattern) => pattern.is_match(value),
        }
    }

    /// Textual form of the criterion for logs and persistence.
    pub fn describe(&self) -> String {
        match self {
            Self::Exact(v) => format!("exact({})", v),
            Self::AnyOf(vs) => format!("any_of({})", vs.join(", ")),
            Self::Regex(p) => format!("regex({})", p.as_str()),
        }
    }
}

impl PartialEq for PropertyCriterion {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::AnyOf(a), Self::AnyOf(b)) => a == b,
            (Self::Regex(a), Self::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

// ============================================================================
// Contract Target
// ============================================================================

/// Where matched events are routed. Exactly one of the two shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractTarget {
    /// A named handler in the local handler registry.
    Handler { name: String },

    /// An external HTTPS endpoint drained through the delivery outbox.
    Url {
        url: Url,
        signing_secret: Option<String>,
        timeout: Duration,
    },
}

impl ContractTarget {
    /// Default per-target delivery timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a handler target.
    pub fn handler(name: impl Into<String>) -> Self {
        Self::Handler { name: name.into() }
    }

    /// Build a URL target with the default timeout and no signing secret.
    pub fn url(url: Url) -> Self {
        Self::Url {
            url,
            signing_secret: None,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Check whether this is a handler target.
    pub fn is_handler(&self) -> bool {
        matches!(self, Self::Handler { .. })
    }
}

/// Origin of a contract registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractOrigin {
    /// Registered by the process at startup (from configuration or code);
    /// lives in memory only and is re-registered on restart.
    Programmatic,

    /// Loaded from or written through to the durable contract store;
    /// may carry a TTL.
    Persisted,
}

// ============================================================================
// Contract
// ============================================================================

/// Immutable subscription record.
///
/// # Examples
///
/// ```rust
/// use hookbridge_core::contract::{Contract, ContractTarget, PropertyCriterion};
/// use hookbridge_core::ContractId;
///
/// let contract = Contract::new(
///     ContractId::new("deploy-on-push").unwrap(),
///     PropertyCriterion::Exact("github".to_string()),
///     PropertyCriterion::AnyOf(vec!["push".to_string(), "pull_request".to_string()]),
///     ContractTarget::handler("deploy_update"),
/// );
/// assert!(contract.target.is_handler());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Contract {
    /// Stable contract identifier
    pub id: ContractId,

    /// Criterion matched against `event.source`
    pub source_criterion: PropertyCriterion,

    /// Criterion matched against `event.event_type`
    pub type_criterion: PropertyCriterion,

    /// Criteria matched against keys in `event.properties` (implicit AND)
    pub property_criteria: Vec<(String, PropertyCriterion)>,

    /// Routing target
    pub target: ContractTarget,

    /// Registration origin
    pub origin: ContractOrigin,

    /// Expiry instant for persisted contracts
    pub ttl_expires_at: Option<Timestamp>,
}

impl Contract {
    /// Create a programmatic contract with no property criteria and no TTL.
    pub fn new(
        id: ContractId,
        source_criterion: PropertyCriterion,
        type_criterion: PropertyCriterion,
        target: ContractTarget,
    ) -> Self {
        Self {
            id,
            source_criterion,
            type_criterion,
            property_criteria: Vec::new(),
            target,
            origin: ContractOrigin::Programmatic,
            ttl_expires_at: None,
        }
    }

    /// Attach property criteria (builder style).
    pub fn with_property_criteria(
        mut self,
        criteria: Vec<(String, PropertyCriterion)>,
    ) -> Self {
        self.property_criteria = criteria;
        self
    }

    /// Mark as persisted with an expiry (builder style).
    pub fn persisted(mut self, ttl_expires_at: Option<Timestamp>) -> Self {
        self.origin = ContractOrigin::Persisted;
        self.ttl_expires_at = ttl_expires_at;
        self
    }

    /// Check whether the contract has expired at `now`.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        match self.ttl_expires_at {
            Some(expires_at) => now >= expires_at,
            None => false,
        }
    }

    /// Check whether every criterion of this contract matches the event.
    ///
    /// A property criterion against an absent property fails the match.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.source_criterion.matches(&event.source) {
            return false;
        }

        if !self.type_criterion.matches(&event.event_type) {
            return false;
        }

        self.property_criteria.iter().all(|(key, criterion)| {
            event
                .property_str(key)
                .map(|value| criterion.matches(&value))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
#[path = "contract_tests.rs"]
mod tests;
