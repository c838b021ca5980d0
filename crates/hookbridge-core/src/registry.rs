//! # Contract Registry
//!
//! In-memory table of subscriber contracts with an optional durable
//! write-through store for persisted (TTL-bearing) contracts.
//!
//! The table is read-mostly: matching reads take a shared lock; writes
//! (registration, removal, TTL sweep, config reload) are infrequent and
//! take the single writer lock.

use crate::config::{ConfigError, ContractRecord, HookConfig};
use crate::contract::{Contract, ContractOrigin};
use crate::event::Event;
use crate::{ContractId, Timestamp};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

// ============================================================================
// ContractStore Trait
// ============================================================================

/// Durable storage for persisted contracts.
///
/// Programmatic contracts never reach the store; they are re-registered
/// from configuration at each startup.
#[async_trait]
pub trait ContractStore: Send + Sync {
    /// Persist or replace a contract record.
    async fn put(&self, record: &ContractRecord) -> Result<(), ContractStoreError>;

    /// Remove a contract record; removing an absent record is a no-op.
    async fn delete(&self, id: &ContractId) -> Result<(), ContractStoreError>;

    /// Load every stored contract record.
    async fn load_all(&self) -> Result<Vec<ContractRecord>, ContractStoreError>;
}

/// Errors from the durable contract store.
#[derive(Debug, thiserror::Error)]
pub enum ContractStoreError {
    #[error("Contract store I/O failure: {message}")]
    Io { message: String },

    #[error("Contract store serialization failure: {message}")]
    Serialization { message: String },
}

// ============================================================================
// ContractRegistry
// ============================================================================

/// Registry storing and matching subscriber contracts.
///
/// # Examples
///
/// ```rust
/// use hookbridge_core::contract::{Contract, ContractTarget, PropertyCriterion};
/// use hookbridge_core::registry::ContractRegistry;
/// use hookbridge_core::ContractId;
///
/// # tokio_test::block_on(async {
/// let registry = ContractRegistry::new();
/// registry
///     .register(Contract::new(
///         ContractId::new("c1").unwrap(),
///         PropertyCriterion::Exact("github".to_string()),
///         PropertyCriterion::Exact("push".to_string()),
///         ContractTarget::handler("deploy_update"),
///     ))
///     .await
///     .unwrap();
/// assert_eq!(registry.len(), 1);
/// # });
/// ```
pub struct ContractRegistry {
    contracts: RwLock<HashMap<ContractId, Contract>>,
    store: Option<Arc<dyn ContractStore>>,
}

impl ContractRegistry {
    /// Create a registry without durable storage.
    pub fn new() -> Self {
        Self {
            contracts: RwLock::new(HashMap::new()),
            store: None,
        }
    }

    /// Create a registry that writes persisted contracts through to `store`.
    pub fn with_store(store: Arc<dyn ContractStore>) -> Self {
        Self {
            contracts: RwLock::new(HashMap::new()),
            store: Some(store),
        }
    }

    /// Register a contract, replacing any existing contract with the same id.
    ///
    /// `Persisted` contracts are written through to the durable store when
    /// one is attached.
    pub async fn register(&self, contract: Contract) -> Result<(), ContractStoreError> {
        if contract.origin == ContractOrigin::Persisted {
            if let Some(store) = &self.store {
                store.put(&ContractRecord::from_contract(&contract)).await?;
            }
        }

        debug!(
            contract_id = %contract.id,
            origin = ?contract.origin,
            "Registered contract"
        );

        let mut contracts = self.contracts.write().expect("contract table poisoned");
        contracts.insert(contract.id.clone(), contract);
        Ok(())
    }

    /// Remove a contract by id. Removing an absent id is a no-op.
    pub async fn remove(&self, id: &ContractId) -> Result<(), ContractStoreError> {
        let removed = {
            let mut contracts = self.contracts.write().expect("contract table poisoned");
            contracts.remove(id)
        };

        if let Some(contract) = removed {
            if contract.origin == ContractOrigin::Persisted {
                if let Some(store) = &self.store {
                    store.delete(id).await?;
                }
            }
            debug!(contract_id = %id, "Removed contract");
        }

        Ok(())
    }

    /// Snapshot of every registered contract.
    pub fn list(&self) -> Vec<Contract> {
        let contracts = self.contracts.read().expect("contract table poisoned");
        contracts.values().cloned().collect()
    }

    /// Number of registered contracts.
    pub fn len(&self) -> usize {
        self.contracts.read().expect("contract table poisoned").len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every contract whose criteria all match the event.
    ///
    /// Expired contracts are skipped even before the sweeper removes them.
    /// There is no best-match selection: each returned contract produces an
    /// independent dispatch outcome.
    pub fn matching(&self, event: &Event) -> Vec<Contract> {
        let now = Timestamp::now();
        let contracts = self.contracts.read().expect("contract table poisoned");

        let mut matched: Vec<Contract> = contracts
            .values()
            .filter(|c| !c.is_expired(now))
            .filter(|c| c.matches(event))
            .cloned()
            .collect();

        // Stable iteration order for dispatch; HashMap order is arbitrary.
        matched.sort_by(|a, b| a.id.as_str().cmp(b.id.as_str()));
        matched
    }

    /// Remove expired persisted contracts. Returns how many were removed.
    pub async fn sweep_expired(&self, now: Timestamp) -> usize {
        let expired: Vec<ContractId> = {
            let contracts = self.contracts.read().expect("contract table poisoned");
            contracts
                .values()
                .filter(|c| c.is_expired(now))
                .map(|c| c.id.clone())
                .collect()
        };

        let mut removed = 0;
        for id in expired {
            match self.remove(&id).await {
                Ok(()) => {
                    info!(contract_id = %id, "Swept expired contract");
                    removed += 1;
                }
                Err(e) => {
                    warn!(contract_id = %id, error = %e, "Failed to sweep expired contract");
                }
            }
        }

        removed
    }

    /// Register every subscription in a configuration document.
    ///
    /// Contracts are registered regardless of whether their inbound endpoint
    /// is mountable, so stream-fed contracts still take effect when the HTTP
    /// layer is unavailable. Returns how many contracts were registered.
    pub async fn load_config(&self, config: &HookConfig) -> Result<usize, ConfigError> {
        let now = Timestamp::now();
        let mut registered = 0;

        for def in &config.subscriptions {
            let contract = def.compile(now)?;
            if let Err(e) = self.register(contract).await {
                warn!(contract_id = %def.id, error = %e, "Failed to persist contract");
            }
            registered += 1;
        }

        info!(count = registered, "Loaded contracts from configuration");
        Ok(registered)
    }

    /// Load previously persisted contracts from the durable store.
    ///
    /// Records that fail to decode are skipped with a warning; a corrupt
    /// record must not prevent startup.
    pub async fn load_persisted(&self) -> Result<usize, ContractStoreError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let records = store.load_all().await?;
        let mut loaded = 0;

        for record in records {
            match record.to_contract() {
                Ok(contract) => {
                    let mut contracts =
                        self.contracts.write().expect("contract table poisoned");
                    contracts.insert(contract.id.clone(), contract);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(contract_id = %record.id, error = %e, "Skipping corrupt persisted contract");
                }
            }
        }

        info!(count = loaded, "Loaded persisted contracts");
        Ok(loaded)
    }
}

impl Default for ContractRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// FsContractStore
// ============================================================================

/// Filesystem contract store: one JSON file per contract under a root
/// directory, written with the write-then-rename pattern.
#[derive(Debug, Clone)]
pub struct FsContractStore {
    base_path: PathBuf,
}

impl FsContractStore {
    /// Create the store, ensuring the base directory exists.
    pub async fn new(base_path: PathBuf) -> Result<Self, ContractStoreError> {
        fs::create_dir_all(&base_path)
            .await
            .map_err(|e| ContractStoreError::Io {
                message: format!("Failed to create contract dir: {}", e),
            })?;
        Ok(Self { base_path })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.base_path.join(format!("{}.json", id))
    }
}

#[async_trait]
impl ContractStore for FsContractStore {
    async fn put(&self, record: &ContractRecord) -> Result<(), ContractStoreError> {
        let json = serde_json::to_string_pretty(record).map_err(|e| {
            ContractStoreError::Serialization {
                message: e.to_string(),
            }
        })?;

        let final_path = self.record_path(&record.id);
        let temp_path = final_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| ContractStoreError::Io {
                message: format!("Failed to create temp file: {}", e),
            })?;
        file.write_all(json.as_bytes())
            .await
            .map_err(|e| ContractStoreError::Io {
                message: format!("Failed to write contract: {}", e),
            })?;
        file.flush().await.map_err(|e| ContractStoreError::Io {
            message: format!("Failed to flush contract: {}", e),
        })?;

        fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| ContractStoreError::Io {
                message: format!("Failed to finalize contract: {}", e),
            })
    }

    async fn delete(&self, id: &ContractId) -> Result<(), ContractStoreError> {
        match fs::remove_file(self.record_path(id.as_str())).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContractStoreError::Io {
                message: format!("Failed to delete contract: {}", e),
            }),
        }
    }

    async fn load_all(&self) -> Result<Vec<ContractRecord>, ContractStoreError> {
        let mut entries =
            fs::read_dir(&self.base_path)
                .await
                .map_err(|e| ContractStoreError::Io {
                    message: format!("Failed to read contract dir: {}", e),
                })?;

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| ContractStoreError::Io {
            message: format!("Failed to iterate contract dir: {}", e),
        })? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let text = fs::read_to_string(&path)
                .await
                .map_err(|e| ContractStoreError::Io {
                    message: format!("Failed to read {}: {}", path.display(), e),
                })?;

            match serde_json::from_str::<ContractRecord>(&text) {
                Ok(record) => records.push(record),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable contract record");
                }
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
