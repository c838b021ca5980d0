//! # Handler Registry and Executor
//!
//! Named in-process handlers and the executor that runs them with a fixed
//! retry ladder, idempotency deduplication, and shutdown grace.
//!
//! Handler retries are in-process and ephemeral: attempt 1 runs
//! immediately, attempt 2 at +10s, attempt 3 at +30s; after three failures
//! the executor logs the exhaustion and stops. There is no dead-letter
//! queue for handlers — they are local code whose job is to tolerate
//! retries. Durable cross-restart retry belongs to the outbox, a separate
//! code path.

use crate::event::Event;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

// ============================================================================
// Types
// ============================================================================

/// Boxed future returned by a handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// A registered handler: an async function over one event.
pub type Handler = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// Error returned by a failing handler attempt.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Create a handler error with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

// ============================================================================
// HandlerRegistry
// ============================================================================

/// Registry of named in-process handlers.
///
/// Handlers are concurrency-safe async functions. A handler may capture an
/// `Arc<Dispatcher>` and publish new events synchronously; cycle avoidance
/// is the registrant's responsibility.
///
/// # Examples
///
/// ```rust
/// use hookbridge_core::handler::HandlerRegistry;
///
/// let registry = HandlerRegistry::new();
/// registry.register("deploy_update", |event| async move {
///     tracing::info!(event_id = %event.event_id, "deploying");
///     Ok(())
/// });
/// assert!(registry.contains("deploy_update"));
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler under `name`, replacing any existing one.
    pub fn register<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let wrapped: Handler = Arc::new(move |event| Box::pin(handler(event)) as HandlerFuture);
        let mut handlers = self.handlers.write().expect("handler table poisoned");
        handlers.insert(name.into(), wrapped);
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<Handler> {
        let handlers = self.handlers.read().expect("handler table poisoned");
        handlers.get(name).cloned()
    }

    /// Check whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        let handlers = self.handlers.read().expect("handler table poisoned");
        handlers.contains_key(name)
    }
}

// ============================================================================
// HandlerExecutor
// ============================================================================

/// Executor running handlers as background tasks with the retry ladder.
pub struct HandlerExecutor {
    registry: Arc<HandlerRegistry>,

    /// Delays before retry attempts (attempt 1 is immediate)
    ladder: Vec<Duration>,

    /// Grace given to in-flight handlers after shutdown is signalled
    grace: Duration,

    /// `(handler, idempotency_key)` pairs seen within the window
    seen_keys: Mutex<HashMap<(String, String), crate::Timestamp>>,

    /// Retention window for idempotency deduplication
    dedup_window: Duration,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HandlerExecutor {
    /// Retry ladder mandated for handlers: +10s, then +30s.
    pub const DEFAULT_LADDER: [Duration; 2] =
        [Duration::from_secs(10), Duration::from_secs(30)];

    /// Default shutdown grace for in-flight handlers.
    pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);

    /// Default idempotency deduplication window.
    pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(600);

    /// Create an executor over the given registry with default timings.
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            registry,
            ladder: Self::DEFAULT_LADDER.to_vec(),
            grace: Self::DEFAULT_GRACE,
            seen_keys: Mutex::new(HashMap::new()),
            dedup_window: Self::DEFAULT_DEDUP_WINDOW,
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Override the retry ladder (test determinism).
    pub fn with_ladder(mut self, ladder: Vec<Duration>) -> Self {
        self.ladder = ladder;
        self
    }

    /// Override the shutdown grace window.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Override the idempotency deduplication window.
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Signal shutdown: in-flight handlers get the grace window, queued
    /// retries are abandoned.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Schedule a handler invocation as a fire-and-forget background task.
    ///
    /// Returns `false` without spawning when the handler name is unknown or
    /// the event's idempotency key was already executed within the
    /// deduplication window.
    pub fn spawn(&self, handler_name: &str, event: Event) -> bool {
        let Some(handler) = self.registry.get(handler_name) else {
            warn!(
                handler = handler_name,
                event_id = %event.event_id,
                "Unknown handler, dropping invocation"
            );
            return false;
        };

        if let Some(key) = &event.idempotency_key {
            if !self.claim_idempotency(handler_name, key) {
                debug!(
                    handler = handler_name,
                    event_id = %event.event_id,
                    idempotency_key = %key,
                    "Duplicate idempotency key, dropping invocation"
                );
                return false;
            }
        }

        tokio::spawn(run_with_retries(
            handler_name.to_string(),
            handler,
            event,
            self.ladder.clone(),
            self.grace,
            self.shutdown_rx.clone(),
        ));

        true
    }

    /// Drop deduplication records older than the retention window.
    pub fn sweep_dedup(&self, now: crate::Timestamp) -> usize {
        let mut seen = self.seen_keys.lock().expect("dedup table poisoned");
        let before = seen.len();
        seen.retain(|_, first_seen| now.duration_since(*first_seen) < self.dedup_window);
        before - seen.len()
    }

    /// Record the key; returns `false` when it was already present within
    /// the window.
    fn claim_idempotency(&self, handler_name: &str, key: &str) -> bool {
        let now = crate::Timestamp::now();
        let mut seen = self.seen_keys.lock().expect("dedup table poisoned");

        let slot = (handler_name.to_string(), key.to_string());
        if let Some(first_seen) = seen.get(&slot) {
            if now.duration_since(*first_seen) < self.dedup_window {
                return false;
            }
        }

        seen.insert(slot, now);
        true
    }

}

/// Run one handler through the ladder: immediate attempt, then the
/// configured delays. Exhaustion is logged as a handler failure; there is
/// no further escalation.
async fn run_with_retries(
    name: String,
    handler: Handler,
    event: Event,
    ladder: Vec<Duration>,
    grace: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let max_attempts = ladder.len() as u32 + 1;
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = ladder[(attempt - 2) as usize];
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = wait_for_shutdown(&mut shutdown) => {
                    warn!(
                        handler = %name,
                        event_id = %event.event_id,
                        attempt,
                        "Shutdown during retry wait, abandoning handler"
                    );
                    return;
                }
            }
        }

        let invocation = handler(event.clone());
        tokio::pin!(invocation);

        let result = tokio::select! {
            result = &mut invocation => result,
            _ = wait_for_shutdown(&mut shutdown) => {
                match tokio::time::timeout(grace, &mut invocation).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(
                            handler = %name,
                            event_id = %event.event_id,
                            grace_ms = grace.as_millis() as u64,
                            "Handler did not finish within shutdown grace, abandoned"
                        );
                        return;
                    }
                }
            }
        };

        match result {
            Ok(()) => {
                debug!(
                    handler = %name,
                    event_id = %event.event_id,
                    attempt,
                    "Handler completed"
                );
                return;
            }
            Err(e) => {
                warn!(
                    handler = %name,
                    event_id = %event.event_id,
                    attempt,
                    error = %e,
                    "Handler attempt failed"
                );
                last_error = e.to_string();
            }
        }
    }

    warn!(
        handler = %name,
        event_id = %event.event_id,
        attempts = max_attempts,
        error = %last_error,
        "Handler failed after exhausting retry ladder"
    );
}

/// Resolve once shutdown is signalled; never resolves otherwise.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender dropped without signalling: shutdown will never come.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;
