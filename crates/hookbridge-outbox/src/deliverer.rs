//! # Deliverer Module
//!
//! The delivery worker that drains the outbox: claims due entries, POSTs
//! the event envelope to the target URL with an HMAC signature, and applies
//! the entry state machine based on the outcome.
//!
//! Multiple workers may run against a shared store; the atomic claim in
//! [`OutboxStore::claim_due`] guarantees an entry is never delivered by two
//! workers concurrently. On startup each worker releases leases abandoned
//! by a crashed predecessor.

use crate::entry::{OutboxEntry, Timestamp};
use crate::error::{DeliveryError, OutboxError};
use crate::retry::DeliveryBackoff;
use crate::store::OutboxStore;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the delivery worker.
#[derive(Debug, Clone)]
pub struct DelivererConfig {
    /// Retry backoff policy
    pub backoff: DeliveryBackoff,

    /// Sleep between polls when the outbox has no due entries
    pub poll_interval: Duration,

    /// In-flight claims older than this are considered abandoned
    pub lease: Duration,

    /// How often the lease sweep runs while the worker is alive
    pub lease_sweep_interval: Duration,
}

impl Default for DelivererConfig {
    fn default() -> Self {
        Self {
            backoff: DeliveryBackoff::default(),
            poll_interval: Duration::from_millis(500),
            lease: Duration::from_secs(60),
            lease_sweep_interval: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// Signature
// ============================================================================

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "x-hookbridge-signature-256";

/// Header carrying the event ID for caller-side deduplication.
pub const EVENT_ID_HEADER: &str = "x-hookbridge-event-id";

/// Compute the `sha256=<hex>` HMAC-SHA256 signature of `body` keyed by
/// `secret` — the format verified by receiving ends.
pub fn sign_body(secret: &str, body: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

// ============================================================================
// Deliverer
// ============================================================================

/// Outbox delivery worker.
///
/// # Examples
///
/// ```rust,no_run
/// use hookbridge_outbox::{Deliverer, DelivererConfig, MemoryOutboxStore};
/// use std::sync::Arc;
///
/// # async fn example() {
/// let store = Arc::new(MemoryOutboxStore::new());
/// let deliverer = Deliverer::new(store, DelivererConfig::default());
/// let (_tx, rx) = tokio::sync::watch::channel(false);
/// tokio::spawn(async move { deliverer.run(rx).await });
/// # }
/// ```
pub struct Deliverer {
    store: Arc<dyn OutboxStore>,
    client: reqwest::Client,
    config: DelivererConfig,
}

impl Deliverer {
    /// Create a worker against the given store.
    pub fn new(store: Arc<dyn OutboxStore>, config: DelivererConfig) -> Self {
        Self {
            store,
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Release leases abandoned by a crashed predecessor.
    ///
    /// Runs at startup before the drain loop; no event is lost to a process
    /// restart between claim and completion.
    pub async fn recover_leases(&self) -> Result<usize, OutboxError> {
        let released = self
            .store
            .release_expired(self.config.lease, Timestamp::now())
            .await?;
        if released > 0 {
            info!(released, "Recovered abandoned in-flight deliveries");
        }
        Ok(released)
    }

    /// Claim and deliver at most one due entry.
    ///
    /// Returns `true` when an entry was processed, `false` when the outbox
    /// had nothing due.
    pub async fn run_once(&self, now: Timestamp) -> Result<bool, OutboxError> {
        let Some(entry) = self.store.claim_due(now).await? else {
            return Ok(false);
        };

        self.deliver(entry, now).await?;
        Ok(true)
    }

    /// Drain loop: claim-deliver until shutdown is signalled.
    ///
    /// The current attempt always runs to completion; shutdown only stops
    /// the loop between entries.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if let Err(e) = self.recover_leases().await {
            warn!(error = %e, "Lease recovery failed at startup");
        }

        let mut lease_sweep = tokio::time::interval(self.config.lease_sweep_interval);
        lease_sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!("Delivery worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once(Timestamp::now()).await {
                Ok(true) => continue,
                Ok(false) => {
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = lease_sweep.tick() => {
                            if let Err(e) = self.recover_leases().await {
                                warn!(error = %e, "Periodic lease sweep failed");
                            }
                        }
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "Outbox store failure in drain loop");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        info!("Delivery worker stopped");
    }

    /// Deliver one claimed entry and record the outcome.
    async fn deliver(&self, entry: OutboxEntry, now: Timestamp) -> Result<(), OutboxError> {
        debug!(
            entry_id = %entry.id,
            contract_id = %entry.contract_id,
            event_id = %entry.event_id,
            attempt = entry.attempts,
            url = %entry.url,
            "Attempting delivery"
        );

        match self.attempt(&entry).await {
            Ok(()) => {
                info!(
                    entry_id = %entry.id,
                    event_id = %entry.event_id,
                    attempts = entry.attempts,
                    "Delivery succeeded"
                );
                self.store.complete(&entry.id).await
            }
            Err(delivery_error) if delivery_error.is_retryable() => {
                if self.config.backoff.allows_retry(entry.attempts) {
                    let delay = self.config.backoff.delay_after(entry.attempts);
                    warn!(
                        entry_id = %entry.id,
                        event_id = %entry.event_id,
                        attempt = entry.attempts,
                        kind = delivery_error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "Delivery failed, retry scheduled"
                    );
                    self.store
                        .reschedule(
                            &entry.id,
                            now.add_duration(delay),
                            &format!("{}: {}", delivery_error.kind(), delivery_error),
                        )
                        .await
                } else {
                    error!(
                        entry_id = %entry.id,
                        event_id = %entry.event_id,
                        attempts = entry.attempts,
                        kind = delivery_error.kind(),
                        "Delivery retries exhausted, dead-lettering"
                    );
                    self.store
                        .dead_letter(
                            &entry.id,
                            &format!("{}: {}", delivery_error.kind(), delivery_error),
                        )
                        .await
                }
            }
            Err(delivery_error) => {
                error!(
                    entry_id = %entry.id,
                    event_id = %entry.event_id,
                    kind = delivery_error.kind(),
                    "Delivery failed permanently"
                );
                self.store
                    .fail(
                        &entry.id,
                        &format!("{}: {}", delivery_error.kind(), delivery_error),
                    )
                    .await
            }
        }
    }

    /// One HTTP attempt against the target.
    async fn attempt(&self, entry: &OutboxEntry) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(&entry.payload).map_err(|e| DeliveryError::Network {
            message: format!("payload serialization failed: {}", e),
        })?;

        let mut request = self
            .client
            .post(&entry.url)
            .timeout(entry.timeout())
            .header("content-type", "application/json")
            .header(EVENT_ID_HEADER, entry.event_id.as_str());

        if let Some(secret) = &entry.signing_secret {
            request = request.header(SIGNATURE_HEADER, sign_body(secret, &body));
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                DeliveryError::Timeout {
                    timeout_ms: entry.timeout_ms,
                }
            } else {
                DeliveryError::Network {
                    message: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        // 429 schedules a retry like a 5xx; any other 4xx is terminal.
        if status.is_server_error() || status.as_u16() == 429 {
            Err(DeliveryError::ServerError {
                status: status.as_u16(),
            })
        } else {
            Err(DeliveryError::ClientError {
                status: status.as_u16(),
            })
        }
    }
}

#[cfg(test)]
#[path = "deliverer_tests.rs"]
mod tests;
