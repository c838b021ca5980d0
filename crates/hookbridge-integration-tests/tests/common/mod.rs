//! Shared harness for integration tests: a fully wired service router over
//! in-memory stores, plus request helpers.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use hookbridge_core::config::HookConfig;
use hookbridge_core::normalizer::NormalizerRegistry;
use hookbridge_core::registry::ContractRegistry;
use hookbridge_core::{DaemonId, Dispatcher, HandlerExecutor, HandlerRegistry};
use hookbridge_outbox::{sign_body, MemoryOutboxStore};
use hookbridge_service::{build_router, AppState};
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

/// A fully wired test service.
pub struct Harness {
    pub router: Router,
    pub outbox: Arc<MemoryOutboxStore>,
    pub contracts: Arc<ContractRegistry>,
    pub handler_calls: Arc<AtomicU32>,
}

/// Build the service from a hook configuration document.
///
/// A counting handler named `deploy_update` is always registered.
pub async fn harness(hooks_yaml: &str) -> Harness {
    let hooks = HookConfig::from_yaml(hooks_yaml).expect("test hook config parses");

    let handler_calls = Arc::new(AtomicU32::new(0));
    let handlers = Arc::new(HandlerRegistry::new());
    {
        let handler_calls = handler_calls.clone();
        handlers.register("deploy_update", move |_event| {
            let handler_calls = handler_calls.clone();
            async move {
                handler_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }
        });
    }

    let contracts = Arc::new(ContractRegistry::new());
    contracts.load_config(&hooks).await.expect("contracts load");

    let executor = Arc::new(HandlerExecutor::new(handlers));
    let outbox = Arc::new(MemoryOutboxStore::new());
    let dispatcher = Arc::new(Dispatcher::new(
        contracts.clone(),
        executor,
        outbox.clone(),
    ));

    let mut normalizers = NormalizerRegistry::new();
    normalizers.register_builtins();

    let state = AppState {
        dispatcher,
        outbox: outbox.clone(),
        publisher: None,
        daemon_id: DaemonId::new("integration-daemon").unwrap(),
    };

    let (router, _report) = build_router(state, &hooks, &normalizers, 1024 * 1024);

    Harness {
        router,
        outbox,
        contracts,
        handler_calls,
    }
}

/// A signed GitHub-style POST to the given path.
pub fn signed_github_post(path: &str, event: &str, body: &str, secret: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("x-github-event", event)
        .header("x-hub-signature-256", sign_body(secret, body.as_bytes()))
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send a request through the router and decode the JSON response body.
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    use tower::ServiceExt;

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };

    (status, body)
}

/// Let spawned handler tasks finish.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(75)).await;
}
