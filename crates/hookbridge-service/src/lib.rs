//! # Hookbridge HTTP Service
//!
//! HTTP ingress for the hookbridge inbound hook service.
//!
//! One route is mounted per configured inbound source at its derived or
//! overridden path. Each route verifies the request (HMAC over the raw
//! body, or the GET challenge handshake), normalizes the payload into a
//! canonical event, and hands it to the dispatcher. Outbox rows for URL
//! targets are persisted before the HTTP response is sent; handler
//! execution and external delivery are asynchronous with respect to the
//! response.

use axum::{
    extract::{DefaultBodyLimit, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use hookbridge_core::config::{HookConfig, InboundSourceDef};
use hookbridge_core::normalizer::{Headers, Normalizer, NormalizerRegistry};
use hookbridge_core::{DaemonId, Dispatcher, EventId, HookError};
use hookbridge_outbox::{OutboxCounts, OutboxStore};
use serde::Serialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

/// Service configuration types
pub mod config;

/// Redis stream fan-out publisher and consumer
pub mod stream;

pub use config::{ServiceConfig, StreamSettings};
pub use stream::{StreamConsumer, StreamPublisher};

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Central matching and routing component
    pub dispatcher: Arc<Dispatcher>,

    /// Outbox store handle for the operational surface
    pub outbox: Arc<dyn OutboxStore>,

    /// Fan-out publisher; `None` when the stream is not configured
    pub publisher: Option<Arc<StreamPublisher>>,

    /// Identity stamped on every locally originated event
    pub daemon_id: DaemonId,
}

/// Per-route state for one mounted inbound source.
#[derive(Clone)]
struct SourceState {
    app: AppState,
    source_name: String,
    def: InboundSourceDef,
    normalizer: Normalizer,
}

// ============================================================================
// Mounting
// ============================================================================

/// Outcome of mounting the configured inbound sources.
#[derive(Debug, Default)]
pub struct MountReport {
    /// Successfully mounted sources and their paths
    pub mounted: Vec<(String, String)>,

    /// Sources that failed to mount, with the failure reason
    pub failed: Vec<(String, String)>,
}

/// Build the service router: one route per inbound source plus the
/// operational surface.
///
/// A source whose normalizer is unknown fails fast and is reported in the
/// [`MountReport`]; the remaining sources still mount, so the service
/// starts degraded rather than not at all.
pub fn build_router(
    state: AppState,
    hooks: &HookConfig,
    normalizers: &NormalizerRegistry,
    max_body_bytes: usize,
) -> (Router, MountReport) {
    let mut router = Router::new()
        .route("/health", get(handle_health))
        .route("/admin/outbox", get(handle_outbox_counts))
        .with_state(state.clone());

    let mut report = MountReport::default();

    for (source_name, def) in &hooks.inbound {
        let normalizer_name = def.resolved_normalizer(source_name);
        let normalizer = match normalizers.get(normalizer_name) {
            Ok(normalizer) => normalizer,
            Err(e) => {
                error!(
                    source = %source_name,
                    normalizer = %normalizer_name,
                    error = %e,
                    "Skipping inbound source with unknown normalizer"
                );
                report.failed.push((source_name.clone(), e.to_string()));
                continue;
            }
        };

        let path = def.resolved_path(source_name);
        let source_state = SourceState {
            app: state.clone(),
            source_name: source_name.clone(),
            def: def.clone(),
            normalizer,
        };

        let source_router = Router::new()
            .route(&path, get(handle_verification).post(handle_ingress))
            .with_state(source_state);

        info!(source = %source_name, path = %path, "Mounted inbound source");
        report.mounted.push((source_name.clone(), path));
        router = router.merge(source_router);
    }

    let router = router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(max_body_bytes))
            .into_inner(),
    );

    (router, report)
}

// ============================================================================
// Ingress Handlers
// ============================================================================

/// Successful ingress response body
#[derive(Debug, Serialize)]
pub struct IngressResponse {
    pub status: String,
    pub event_id: EventId,
}

/// Handle `POST {path}`: verify, normalize, dispatch.
#[instrument(skip(state, headers, body), fields(source = %state.source_name))]
async fn handle_ingress(
    State(state): State<SourceState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngressResponse>, IngressError> {
    // 1. HMAC verification over the raw body when a secret is configured.
    if let Some(secret) = &state.def.secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or(HookError::MissingSignature)?;
        verify_signature(secret, &body, signature)?;
    }

    // 2. JSON decode.
    let payload: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| HookError::InvalidPayload {
            message: e.to_string(),
        })?;

    // 3. Normalize with lowercased headers.
    let lowercased = lowercase_headers(&headers);
    let mut event =
        (state.normalizer)(payload, &lowercased).map_err(|e| HookError::NormalizerFailed {
            name: state
                .def
                .resolved_normalizer(&state.source_name)
                .to_string(),
            message: e.to_string(),
        })?;

    // 4. Stamp the origin identity used by the fan-out self-skip.
    event.set_property("daemon_id", state.app.daemon_id.as_str());

    // 5. Dispatch. Outbox rows are persisted inside dispatch, before the
    //    response; downstream trouble must not block inbound acceptance.
    let result = state.app.dispatcher.dispatch(&event).await;
    if !result.is_clean() {
        warn!(
            event_id = %event.event_id,
            errors = ?result.errors,
            "Dispatch completed with routing failures"
        );
    }

    // 6. Fan out to peer daemons (locally originated events only).
    if let Some(publisher) = &state.app.publisher {
        let publisher = publisher.clone();
        let fanout_event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.publish(&fanout_event).await {
                warn!(
                    event_id = %fanout_event.event_id,
                    error = %e,
                    "Stream fan-out publish failed"
                );
            }
        });
    }

    Ok(Json(IngressResponse {
        status: "accepted".to_string(),
        event_id: event.event_id,
    }))
}

/// Handle `GET {path}`: the platform challenge handshake.
///
/// Echoes `hub.challenge` when `hub.verify_token` matches the configured
/// token; `403` on mismatch; `405` when the source has no token or the
/// query does not carry the challenge parameters.
#[instrument(skip(state, params), fields(source = %state.source_name))]
async fn handle_verification(
    State(state): State<SourceState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(expected_token) = &state.def.verify_token else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };

    let mode = params.get("hub.mode").map(String::as_str);
    let token = params.get("hub.verify_token");
    let challenge = params.get("hub.challenge");

    match (mode, token, challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) => {
            if token == expected_token {
                info!("Verification handshake accepted");
                (StatusCode::OK, challenge.clone()).into_response()
            } else {
                warn!("Verification handshake rejected: token mismatch");
                StatusCode::FORBIDDEN.into_response()
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

// ============================================================================
// Operational Surface
// ============================================================================

/// Basic health response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health(State(_state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_outbox_counts(
    State(state): State<AppState>,
) -> Result<Json<OutboxCounts>, IngressError> {
    let counts = state
        .outbox
        .counts()
        .await
        .map_err(|e| IngressError::Internal {
            message: e.to_string(),
        })?;
    Ok(Json(counts))
}

// ============================================================================
// Verification Helpers
// ============================================================================

/// Verify a `sha256=<hex>` HMAC-SHA256 signature over the raw body.
///
/// The comparison runs in constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> Result<(), HookError> {
    type HmacSha256 = Hmac<Sha256>;

    let hex_part = signature.strip_prefix("sha256=").unwrap_or(signature);
    let sig_bytes = hex::decode(hex_part).map_err(|_| HookError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| HookError::InvalidSignature)?;
    mac.update(body);

    mac.verify_slice(&sig_bytes)
        .map_err(|_| HookError::InvalidSignature)
}

/// Lowercase the header map into the dict normalizers consume.
///
/// Lowercased keys are the contract between transport and normalizer;
/// every normalizer can rely on case-insensitive lookup.
fn lowercase_headers(headers: &HeaderMap) -> Headers {
    headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_lowercase(),
                v.to_str().unwrap_or("").to_string(),
            )
        })
        .collect()
}

// ============================================================================
// Error Mapping
// ============================================================================

/// Ingress errors with HTTP status mapping.
///
/// Client errors (`400`/`401`) carry the stable error kind in the body;
/// everything else is an internal error.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Error body shape: `{"error": kind, "message": detail}`
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match &self {
            Self::Hook(hook_error) => {
                let status = match hook_error {
                    HookError::InvalidSignature | HookError::MissingSignature => {
                        StatusCode::UNAUTHORIZED
                    }
                    e if e.is_client_error() => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    hook_error.error_kind().to_string(),
                    hook_error.to_string(),
                )
            }
            Self::Internal { message } => {
                error!(error = %message, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal".to_string(),
                    "internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(ErrorBody {
                error: kind,
                message,
            }),
        )
            .into_response()
    }
}

// ============================================================================
// Server
// ============================================================================

/// Errors starting or running the HTTP server.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },
}

/// Start the HTTP server and serve until shutdown is signalled.
pub async fn start_server(
    addr: SocketAddr,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServiceError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: addr.to_string(),
            message: e.to_string(),
        })?;

    info!(address = %addr, "Starting HTTP server");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
            info!("HTTP server draining");
        })
        .await
        .map_err(|e| ServiceError::ServerFailed {
            message: e.to_string(),
        })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
