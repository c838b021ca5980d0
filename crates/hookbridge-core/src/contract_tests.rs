//! Tests for contract criteria and matching semantics.

use super::*;
use crate::event::PropertyValue;
use std::collections::BTreeMap;

// ============================================================================
// Helpers
// ============================================================================

fn push_event() -> Event {
    let mut properties = BTreeMap::new();
    properties.insert("repo".to_string(), PropertyValue::from("owner/repo"));
    properties.insert("ref".to_string(), PropertyValue::from("refs/heads/main"));
    properties.insert("hook_id".to_string(), PropertyValue::from(42i64));

    Event::new("github", "push")
        .unwrap()
        .with_properties(properties)
}

fn github_push_contract(target: ContractTarget) -> Contract {
    Contract::new(
        ContractId::new("c1").unwrap(),
        PropertyCriterion::Exact("github".to_string()),
        PropertyCriterion::AnyOf(vec!["push".to_string(), "pull_request".to_string()]),
        target,
    )
}

// ============================================================================
// Criterion tests
// ============================================================================

mod criterion_tests {
    use super::*;

    #[test]
    fn test_exact_is_case_sensitive() {
        let criterion = PropertyCriterion::Exact("github".to_string());

        assert!(criterion.matches("github"));
        assert!(!criterion.matches("GitHub"));
        assert!(!criterion.matches("github "));
    }

    #[test]
    fn test_any_of_matches_each_member() {
        let criterion =
            PropertyCriterion::AnyOf(vec!["push".to_string(), "pull_request".to_string()]);

        assert!(criterion.matches("push"));
        assert!(criterion.matches("pull_request"));
        assert!(!criterion.matches("issues"));
    }

    #[test]
    fn test_regex_matches_unanchored() {
        let criterion = PropertyCriterion::regex(r"^refs/heads/").unwrap();

        assert!(criterion.matches("refs/heads/main"));
        assert!(!criterion.matches("refs/tags/v1.0"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let result = PropertyCriterion::regex("[unclosed");
        assert!(matches!(
            result,
            Err(crate::ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_criterion_equality_compares_patterns() {
        let a = PropertyCriterion::regex("^a+$").unwrap();
        let b = PropertyCriterion::regex("^a+$").unwrap();
        let c = PropertyCriterion::regex("^b+$").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

// ============================================================================
// Contract matching tests
// ============================================================================

mod matching_tests {
    use super::*;

    #[test]
    fn test_source_and_type_must_both_match() {
        let contract = github_push_contract(ContractTarget::handler("deploy_update"));

        assert!(contract.matches(&push_event()));

        let wrong_source = Event::new("gitlab", "push").unwrap();
        assert!(!contract.matches(&wrong_source));

        let wrong_type = Event::new("github", "issues").unwrap();
        assert!(!contract.matches(&wrong_type));
    }

    #[test]
    fn test_property_criteria_are_anded() {
        let contract = github_push_contract(ContractTarget::handler("deploy_update"))
            .with_property_criteria(vec![
                (
                    "repo".to_string(),
                    PropertyCriterion::Exact("owner/repo".to_string()),
                ),
                (
                    "ref".to_string(),
                    PropertyCriterion::regex("^refs/heads/").unwrap(),
                ),
            ]);

        assert!(contract.matches(&push_event()));

        let mut tag_push = push_event();
        tag_push.set_property("ref", "refs/tags/v1.0");
        assert!(!tag_push.properties.is_empty());
        assert!(!contract.matches(&tag_push));
    }

    #[test]
    fn test_absent_property_fails_the_match() {
        let contract = github_push_contract(ContractTarget::handler("deploy_update"))
            .with_property_criteria(vec![(
                "missing".to_string(),
                PropertyCriterion::Exact("anything".to_string()),
            )]);

        assert!(!contract.matches(&push_event()));
    }

    #[test]
    fn test_integer_property_matches_textual_form() {
        let contract = github_push_contract(ContractTarget::handler("deploy_update"))
            .with_property_criteria(vec![(
                "hook_id".to_string(),
                PropertyCriterion::Exact("42".to_string()),
            )]);

        assert!(contract.matches(&push_event()));
    }

    #[test]
    fn test_contract_without_property_criteria_matches_on_source_and_type() {
        let contract = github_push_contract(ContractTarget::handler("deploy_update"));
        let bare = Event::new("github", "pull_request").unwrap();

        assert!(contract.matches(&bare));
    }
}

// ============================================================================
// Expiry tests
// ============================================================================

mod expiry_tests {
    use super::*;

    #[test]
    fn test_programmatic_contract_never_expires() {
        let contract = github_push_contract(ContractTarget::handler("h"));

        assert!(!contract.is_expired(Timestamp::now().add_seconds(1_000_000)));
    }

    #[test]
    fn test_persisted_contract_expires_after_ttl() {
        let now = Timestamp::now();
        let contract =
            github_push_contract(ContractTarget::handler("h")).persisted(Some(now.add_seconds(60)));

        assert!(!contract.is_expired(now));
        assert!(contract.is_expired(now.add_seconds(61)));
    }

    #[test]
    fn test_url_target_defaults() {
        let url = url::Url::parse("https://example.test/hook").unwrap();
        let target = ContractTarget::url(url);

        match target {
            ContractTarget::Url {
                signing_secret,
                timeout,
                ..
            } => {
                assert!(signing_secret.is_none());
                assert_eq!(timeout, ContractTarget::DEFAULT_TIMEOUT);
            }
            _ => panic!("expected URL target"),
        }
    }
}
