//! # Hook Configuration Document
//!
//! Serde shape of the `inbound` + `subscriptions` configuration document,
//! shared between the contract registry (which loads subscriptions) and the
//! service layer (which mounts inbound endpoints).
//!
//! ```yaml
//! inbound:
//!   github:
//!     secret: "s3cr3t"
//! subscriptions:
//!   - id: deploy-on-push
//!     source_criterion: { match: github }
//!     type_criterion: { match: [push, pull_request] }
//!     property_criteria:
//!       - { key: ref, regex: "^refs/heads/" }
//!     target: { handler: deploy_update }
//! ```

use crate::contract::{Contract, ContractTarget, PropertyCriterion};
use crate::{ContractId, Timestamp, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use url::Url;

// ============================================================================
// Document Root
// ============================================================================

/// The canonical configuration mapping: inbound source definitions plus
/// subscriber contracts.
///
/// Subscriptions are loaded regardless of whether their inbound endpoint is
/// mountable, so contracts consuming events from the peer stream still take
/// effect when the HTTP layer is unavailable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookConfig {
    /// Inbound HTTP sources, keyed by source name
    #[serde(default)]
    pub inbound: BTreeMap<String, InboundSourceDef>,

    /// Subscriber contract definitions
    #[serde(default)]
    pub subscriptions: Vec<ContractDef>,
}

impl HookConfig {
    /// Parse a YAML document.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }
}

// ============================================================================
// Inbound Source Definition
// ============================================================================

/// Configuration record describing one mounted HTTP endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundSourceDef {
    /// HTTP path override; derived from the source name when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Normalizer key override; defaults to the source name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalizer: Option<String>,

    /// Shared secret for HMAC-SHA256 body verification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// Token for one-shot GET challenge-response handshakes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_token: Option<String>,
}

impl InboundSourceDef {
    /// The HTTP path this source is mounted at.
    ///
    /// The derivation is pure: the path IS the routing key, never resolved
    /// back through a lookup table at request time.
    pub fn resolved_path(&self, source_name: &str) -> String {
        self.path
            .clone()
            .unwrap_or_else(|| format!("/hooks/inbound/{}", source_name))
    }

    /// The normalizer key this source uses.
    pub fn resolved_normalizer<'a>(&'a self, source_name: &'a str) -> &'a str {
        self.normalizer.as_deref().unwrap_or(source_name)
    }
}

// ============================================================================
// Criterion Definitions
// ============================================================================

/// One matching criterion in configuration form.
///
/// Exactly one of `match` (a string for `exact`, a list for `any_of`) or
/// `regex` must be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CriterionDef {
    #[serde(
        rename = "match",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub match_value: Option<MatchDef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

/// The `match` key accepts a single value or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatchDef {
    One(String),
    Many(Vec<String>),
}

impl CriterionDef {
    /// Build an `exact` criterion definition.
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            match_value: Some(MatchDef::One(value.into())),
            regex: None,
        }
    }

    /// Build an `any_of` criterion definition.
    pub fn any_of(values: Vec<String>) -> Self {
        Self {
            match_value: Some(MatchDef::Many(values)),
            regex: None,
        }
    }

    /// Build a `regex` criterion definition.
    pub fn regex_pattern(pattern: impl Into<String>) -> Self {
        Self {
            match_value: None,
            regex: Some(pattern.into()),
        }
    }

    /// Compile into the runtime criterion.
    pub fn compile(&self, context: &str) -> Result<PropertyCriterion, ConfigError> {
        match (&self.match_value, &self.regex) {
            (Some(MatchDef::One(value)), None) => Ok(PropertyCriterion::Exact(value.clone())),
            (Some(MatchDef::Many(values)), None) => Ok(PropertyCriterion::AnyOf(values.clone())),
            (None, Some(pattern)) => {
                PropertyCriterion::regex(pattern).map_err(|e| ConfigError::InvalidCriterion {
                    context: context.to_string(),
                    message: e.to_string(),
                })
            }
            (Some(_), Some(_)) => Err(ConfigError::InvalidCriterion {
                context: context.to_string(),
                message: "'match' and 'regex' are mutually exclusive".to_string(),
            }),
            (None, None) => Err(ConfigError::InvalidCriterion {
                context: context.to_string(),
                message: "one of 'match' or 'regex' is required".to_string(),
            }),
        }
    }

    /// Configuration form of a runtime criterion (used for persistence).
    pub fn from_criterion(criterion: &PropertyCriterion) -> Self {
        match criterion {
            PropertyCriterion::Exact(v) => Self::exact(v.clone()),
            PropertyCriterion::AnyOf(vs) => Self::any_of(vs.clone()),
            PropertyCriterion::Regex(p) => Self::regex_pattern(p.as_str()),
        }
    }
}

/// A property criterion keyed into `event.properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyCriterionDef {
    pub key: String,

    #[serde(flatten)]
    pub criterion: CriterionDef,
}

// ============================================================================
// Target Definition
// ============================================================================

/// Routing target in configuration form: exactly one of `handler` / `url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl TargetDef {
    /// Compile into the runtime target.
    pub fn compile(&self, contract_id: &str) -> Result<ContractTarget, ConfigError> {
        match (&self.handler, &self.url) {
            (Some(handler), None) => Ok(ContractTarget::Handler {
                name: handler.clone(),
            }),
            (None, Some(url)) => {
                let parsed = Url::parse(url).map_err(|e| ConfigError::InvalidTarget {
                    contract_id: contract_id.to_string(),
                    message: format!("bad url '{}': {}", url, e),
                })?;
                Ok(ContractTarget::Url {
                    url: parsed,
                    signing_secret: self.signing_secret.clone(),
                    timeout: self
                        .timeout_ms
                        .map(Duration::from_millis)
                        .unwrap_or(ContractTarget::DEFAULT_TIMEOUT),
                })
            }
            (Some(_), Some(_)) => Err(ConfigError::InvalidTarget {
                contract_id: contract_id.to_string(),
                message: "'handler' and 'url' are mutually exclusive".to_string(),
            }),
            (None, None) => Err(ConfigError::InvalidTarget {
                contract_id: contract_id.to_string(),
                message: "one of 'handler' or 'url' is required".to_string(),
            }),
        }
    }

    /// Configuration form of a runtime target (used for persistence).
    pub fn from_target(target: &ContractTarget) -> Self {
        match target {
            ContractTarget::Handler { name } => Self {
                handler: Some(name.clone()),
                ..Self::default()
            },
            ContractTarget::Url {
                url,
                signing_secret,
                timeout,
            } => Self {
                url: Some(url.to_string()),
                signing_secret: signing_secret.clone(),
                timeout_ms: Some(timeout.as_millis() as u64),
                ..Self::default()
            },
        }
    }
}

// ============================================================================
// Contract Definition
// ============================================================================

/// One subscriber contract in configuration form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDef {
    pub id: String,

    pub source_criterion: CriterionDef,

    pub type_criterion: CriterionDef,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_criteria: Vec<PropertyCriterionDef>,

    pub target: TargetDef,

    /// Contracts with a TTL are persisted and expire; contracts without one
    /// are programmatic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
}

impl ContractDef {
    /// Compile the definition into a runtime [`Contract`].
    ///
    /// `now` anchors the TTL expiry for persisted contracts.
    pub fn compile(&self, now: Timestamp) -> Result<Contract, ConfigError> {
        let id = ContractId::new(&self.id).map_err(|e| ConfigError::InvalidContract {
            contract_id: self.id.clone(),
            message: e.to_string(),
        })?;

        let source_criterion = self
            .source_criterion
            .compile(&format!("{}.source_criterion", self.id))?;
        let type_criterion = self
            .type_criterion
            .compile(&format!("{}.type_criterion", self.id))?;

        let mut property_criteria = Vec::with_capacity(self.property_criteria.len());
        for def in &self.property_criteria {
            let criterion = def
                .criterion
                .compile(&format!("{}.property_criteria[{}]", self.id, def.key))?;
            property_criteria.push((def.key.clone(), criterion));
        }

        let target = self.target.compile(&self.id)?;

        let mut contract = Contract::new(id, source_criterion, type_criterion, target)
            .with_property_criteria(property_criteria);

        if let Some(ttl) = self.ttl_seconds {
            contract = contract.persisted(Some(now.add_seconds(ttl)));
        }

        Ok(contract)
    }
}

// ============================================================================
// Persisted Contract Record
// ============================================================================

/// Durable form of a persisted contract: criteria plus an absolute expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub id: String,
    pub source_criterion: CriterionDef,
    pub type_criterion: CriterionDef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub property_criteria: Vec<PropertyCriterionDef>,
    pub target: TargetDef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_expires_at: Option<String>,
}

impl ContractRecord {
    /// Snapshot a runtime contract for persistence.
    pub fn from_contract(contract: &Contract) -> Self {
        Self {
            id: contract.id.to_string(),
            source_criterion: CriterionDef::from_criterion(&contract.source_criterion),
            type_criterion: CriterionDef::from_criterion(&contract.type_criterion),
            property_criteria: contract
                .property_criteria
                .iter()
                .map(|(key, criterion)| PropertyCriterionDef {
                    key: key.clone(),
                    criterion: CriterionDef::from_criterion(criterion),
                })
                .collect(),
            target: TargetDef::from_target(&contract.target),
            ttl_expires_at: contract.ttl_expires_at.map(|t| t.to_rfc3339()),
        }
    }

    /// Rebuild the runtime contract. The result is always `Persisted`.
    pub fn to_contract(&self) -> Result<Contract, ConfigError> {
        let ttl_expires_at = match &self.ttl_expires_at {
            Some(text) => {
                Some(
                    Timestamp::from_rfc3339(text).map_err(|e| ConfigError::InvalidContract {
                        contract_id: self.id.clone(),
                        message: format!("bad ttl_expires_at: {}", e),
                    })?,
                )
            }
            None => None,
        };

        let def = ContractDef {
            id: self.id.clone(),
            source_criterion: self.source_criterion.clone(),
            type_criterion: self.type_criterion.clone(),
            property_criteria: self.property_criteria.clone(),
            target: self.target.clone(),
            ttl_seconds: None,
        };

        Ok(def.compile(Timestamp::now())?.persisted(ttl_expires_at))
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors loading or compiling the hook configuration document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {message}")]
    Parse { message: String },

    #[error("Invalid criterion at {context}: {message}")]
    InvalidCriterion { context: String, message: String },

    #[error("Invalid target for contract '{contract_id}': {message}")]
    InvalidTarget {
        contract_id: String,
        message: String,
    },

    #[error("Invalid contract '{contract_id}': {message}")]
    InvalidContract {
        contract_id: String,
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
