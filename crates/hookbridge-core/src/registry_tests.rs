//! Tests for the contract registry and the filesystem contract store.

use super::*;
use crate::config::HookConfig;
use crate::contract::{ContractTarget, PropertyCriterion};
use crate::event::Event;

// ============================================================================
// Helpers
// ============================================================================

fn contract(id: &str, source: &str, event_type: &str) -> Contract {
    Contract::new(
        ContractId::new(id).unwrap(),
        PropertyCriterion::Exact(source.to_string()),
        PropertyCriterion::Exact(event_type.to_string()),
        ContractTarget::handler("noop"),
    )
}

// ============================================================================
// Registration and matching
// ============================================================================

mod registry_tests {
    use super::*;

    #[tokio::test]
    async fn test_register_is_idempotent_on_id() {
        let registry = ContractRegistry::new();
        registry
            .register(contract("c1", "github", "push"))
            .await
            .unwrap();
        registry
            .register(contract("c1", "github", "issues"))
            .await
            .unwrap();

        assert_eq!(registry.len(), 1);
        let stored = &registry.list()[0];
        assert!(stored.type_criterion.matches("issues"));
    }

    #[tokio::test]
    async fn test_matching_returns_every_match_sorted_by_id() {
        let registry = ContractRegistry::new();
        registry
            .register(contract("b", "github", "push"))
            .await
            .unwrap();
        registry
            .register(contract("a", "github", "push"))
            .await
            .unwrap();
        registry
            .register(contract("c", "github", "issues"))
            .await
            .unwrap();

        let event = Event::new("github", "push").unwrap();
        let matched = registry.matching(&event);

        let ids: Vec<&str> = matched.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_no_match_returns_empty() {
        let registry = ContractRegistry::new();
        registry
            .register(contract("c1", "github", "push"))
            .await
            .unwrap();

        let event = Event::new("gitlab", "push").unwrap();
        assert!(registry.matching(&event).is_empty());
    }

    #[tokio::test]
    async fn test_remove_absent_contract_is_noop() {
        let registry = ContractRegistry::new();
        registry
            .remove(&ContractId::new("ghost").unwrap())
            .await
            .unwrap();

        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_expired_contract_is_not_matched() {
        let registry = ContractRegistry::new();
        let now = Timestamp::now();
        let expired = contract("old", "github", "push")
            .persisted(Some(now.subtract_duration(std::time::Duration::from_secs(1))));
        registry.register(expired).await.unwrap();

        let event = Event::new("github", "push").unwrap();
        assert!(registry.matching(&event).is_empty());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let registry = ContractRegistry::new();
        let now = Timestamp::now();

        registry
            .register(
                contract("expired", "github", "push")
                    .persisted(Some(now.subtract_duration(std::time::Duration::from_secs(1)))),
            )
            .await
            .unwrap();
        registry
            .register(
                contract("fresh", "github", "push").persisted(Some(now.add_seconds(3600))),
            )
            .await
            .unwrap();
        registry
            .register(contract("forever", "github", "push"))
            .await
            .unwrap();

        let removed = registry.sweep_expired(now).await;

        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 2);
    }
}

// ============================================================================
// Config loading
// ============================================================================

mod config_loading_tests {
    use super::*;

    #[tokio::test]
    async fn test_load_config_registers_all_subscriptions() {
        let yaml = r#"
subscriptions:
  - id: one
    source_criterion: { match: github }
    type_criterion: { match: push }
    target: { handler: h }
  - id: two
    source_criterion: { match: deployment }
    type_criterion: { match: version_available }
    target: { url: "https://example.test/hook" }
"#;
        let config = HookConfig::from_yaml(yaml).unwrap();
        let registry = ContractRegistry::new();

        let count = registry.load_config(&config).await.unwrap();

        assert_eq!(count, 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_load_config_registers_contract_without_inbound_endpoint() {
        // The "deployment" source has no inbound block; the contract must
        // still take effect for stream-fed events.
        let yaml = r#"
inbound:
  github: {}
subscriptions:
  - id: deploy
    source_criterion: { match: deployment }
    type_criterion: { match: version_available }
    target: { handler: restart }
"#;
        let config = HookConfig::from_yaml(yaml).unwrap();
        let registry = ContractRegistry::new();
        registry.load_config(&config).await.unwrap();

        let event = Event::new("deployment", "version_available").unwrap();
        assert_eq!(registry.matching(&event).len(), 1);
    }
}

// ============================================================================
// Filesystem store
// ============================================================================

mod fs_store_tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_persisted_contract_written_through_and_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsContractStore::new(dir.path().to_path_buf()).await.unwrap());

        let registry = ContractRegistry::with_store(store.clone());
        let persisted = contract("durable", "github", "push")
            .persisted(Some(Timestamp::now().add_seconds(3600)));
        registry.register(persisted).await.unwrap();

        // A fresh registry sharing the store sees the contract after load.
        let reloaded = ContractRegistry::with_store(store);
        let count = reloaded.load_persisted().await.unwrap();

        assert_eq!(count, 1);
        let event = Event::new("github", "push").unwrap();
        assert_eq!(reloaded.matching(&event).len(), 1);
    }

    #[tokio::test]
    async fn test_programmatic_contract_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsContractStore::new(dir.path().to_path_buf()).await.unwrap());

        let registry = ContractRegistry::with_store(store.clone());
        registry
            .register(contract("ephemeral", "github", "push"))
            .await
            .unwrap();

        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_deletes_persisted_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsContractStore::new(dir.path().to_path_buf()).await.unwrap());

        let registry = ContractRegistry::with_store(store.clone());
        let id = ContractId::new("durable").unwrap();
        registry
            .register(
                contract("durable", "github", "push")
                    .persisted(Some(Timestamp::now().add_seconds(3600))),
            )
            .await
            .unwrap();
        registry.remove(&id).await.unwrap();

        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("bad.json"), "{not json")
            .await
            .unwrap();

        let store = Arc::new(FsContractStore::new(dir.path().to_path_buf()).await.unwrap());
        let records = store.load_all().await.unwrap();

        assert!(records.is_empty());
    }
}
