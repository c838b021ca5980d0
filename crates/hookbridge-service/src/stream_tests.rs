//! Tests for the fan-out record handling and the self-skip decision.
//!
//! The skip decision and record conversion are pure, so the two-daemon
//! fan-out behaviour is verified here without a live broker: daemon A's
//! published record must be dropped by A and dispatched by B.

use super::*;
use hookbridge_core::contract::{Contract, ContractTarget, PropertyCriterion};
use hookbridge_core::registry::ContractRegistry;
use hookbridge_core::{ContractId, HandlerExecutor, HandlerRegistry};
use hookbridge_outbox::MemoryOutboxStore;
use std::sync::atomic::{AtomicU32, Ordering};

// ============================================================================
// Helpers
// ============================================================================

fn event_from(daemon_id: &str) -> Event {
    let mut event = Event::new("deployment", "version_available").unwrap();
    event.set_property("daemon_id", daemon_id);
    event
}

fn to_redis_map(event: &Event) -> HashMap<String, redis::Value> {
    event
        .to_stream_record()
        .into_iter()
        .map(|(k, v)| (k, redis::Value::BulkString(v.into_bytes())))
        .collect()
}

// ============================================================================
// Self-skip
// ============================================================================

mod self_skip_tests {
    use super::*;

    #[test]
    fn test_own_event_is_skipped() {
        let daemon = DaemonId::new("node-a").unwrap();
        assert!(is_own_event(&event_from("node-a"), &daemon));
    }

    #[test]
    fn test_peer_event_is_not_skipped() {
        let daemon = DaemonId::new("node-a").unwrap();
        assert!(!is_own_event(&event_from("node-b"), &daemon));
    }

    #[test]
    fn test_event_without_daemon_id_is_not_skipped() {
        let daemon = DaemonId::new("node-a").unwrap();
        let event = Event::new("deployment", "version_available").unwrap();
        assert!(!is_own_event(&event, &daemon));
    }
}

// ============================================================================
// Record conversion
// ============================================================================

mod record_tests {
    use super::*;

    #[test]
    fn test_round_trip_through_redis_values() {
        let event = event_from("node-a");
        let map = to_redis_map(&event);

        let record = record_from_entry(&map);
        let decoded = Event::from_stream_record(&record).unwrap();

        assert_eq!(decoded, event);
    }

    #[test]
    fn test_non_string_fields_are_skipped() {
        let event = event_from("node-a");
        let mut map = to_redis_map(&event);
        map.insert("weird".to_string(), redis::Value::Nil);

        let record = record_from_entry(&map);
        assert!(!record.contains_key("weird"));
        assert!(Event::from_stream_record(&record).is_ok());
    }

    #[test]
    fn test_integer_fields_convert_to_text() {
        let mut map = HashMap::new();
        map.insert("n".to_string(), redis::Value::Int(42));

        let record = record_from_entry(&map);
        assert_eq!(record.get("n").map(String::as_str), Some("42"));
    }
}

// ============================================================================
// Two-daemon fan-out semantics
// ============================================================================

mod fanout_tests {
    use super::*;
    use std::sync::Arc;

    /// Dispatcher whose single contract counts handler invocations.
    async fn counting_dispatcher() -> (Arc<Dispatcher>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));

        let handlers = Arc::new(HandlerRegistry::new());
        {
            let calls = calls.clone();
            handlers.register("on_deploy", move |_event| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        let contracts = Arc::new(ContractRegistry::new());
        let executor = Arc::new(HandlerExecutor::new(handlers));
        let outbox = Arc::new(MemoryOutboxStore::new());
        let dispatcher = Arc::new(Dispatcher::new(contracts.clone(), executor, outbox));

        contracts
            .register(Contract::new(
                ContractId::new("deploy").unwrap(),
                PropertyCriterion::Exact("deployment".to_string()),
                PropertyCriterion::Exact("version_available".to_string()),
                ContractTarget::handler("on_deploy"),
            ))
            .await
            .unwrap();

        (dispatcher, calls)
    }

    #[tokio::test]
    async fn test_receiving_daemon_dispatches_peer_record() {
        let (dispatcher, calls) = counting_dispatcher().await;
        let daemon_b = DaemonId::new("node-b").unwrap();

        // Record published by node A, received on node B.
        let record = record_from_entry(&to_redis_map(&event_from("node-a")));
        let event = Event::from_stream_record(&record).unwrap();

        assert!(!is_own_event(&event, &daemon_b));
        dispatcher.dispatch(&event).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_originating_daemon_drops_its_own_record() {
        let (_dispatcher, calls) = counting_dispatcher().await;
        let daemon_a = DaemonId::new("node-a").unwrap();

        let record = record_from_entry(&to_redis_map(&event_from("node-a")));
        let event = Event::from_stream_record(&record).unwrap();

        // The consumer's guard: dispatch is never invoked for own events.
        assert!(is_own_event(&event, &daemon_a));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}

// ============================================================================
// Construction
// ============================================================================

mod construction_tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_publisher_construction_is_lazy() {
        // No Redis listening here; construction must still succeed.
        let settings = StreamSettings {
            redis_url: "redis://127.0.0.1:1/".to_string(),
            ..StreamSettings::default()
        };
        assert!(StreamPublisher::new(settings).is_ok());
    }

    #[test]
    fn test_consumer_construction_is_lazy() {
        let settings = StreamSettings {
            redis_url: "redis://127.0.0.1:1/".to_string(),
            ..StreamSettings::default()
        };

        let contracts = Arc::new(ContractRegistry::new());
        let executor = Arc::new(HandlerExecutor::new(Arc::new(HandlerRegistry::new())));
        let outbox = Arc::new(MemoryOutboxStore::new());
        let dispatcher = Arc::new(Dispatcher::new(contracts, executor, outbox));

        let consumer =
            StreamConsumer::new(settings, DaemonId::new("node-a").unwrap(), dispatcher);
        assert!(consumer.is_ok());
    }
}
