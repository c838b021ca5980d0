//! # Stream Fan-out
//!
//! Peer-to-peer broadcast of events over a shared Redis stream so
//! multi-process deployments observe each other's events.
//!
//! Every locally originated event is published as a flat stream record
//! (capped with `XADD MAXLEN ~`); every peer runs a consumer that
//! reconstructs the envelope and dispatches it. Records carrying this
//! process's own `daemon_id` are silently dropped — the originating node
//! already executed its handlers locally, and re-dispatching would double
//! them.
//!
//! Received events are never re-published; only ingress publishes. That
//! asymmetry is what keeps the fan-out loop-free.

use crate::config::StreamSettings;
use hookbridge_core::{DaemonId, Dispatcher, Event};
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamMaxlen, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

// ============================================================================
// Self-skip
// ============================================================================

/// Check whether a received event originated from this process.
///
/// The decision is a pure function of the record: the `daemon_id`
/// property stamped at ingress against the local identity.
pub fn is_own_event(event: &Event, daemon_id: &DaemonId) -> bool {
    event
        .property_str("daemon_id")
        .map(|origin| origin == daemon_id.as_str())
        .unwrap_or(false)
}

/// Convert a raw stream entry map into the flat string record the envelope
/// codec consumes. Non-string values are skipped with a warning.
pub fn record_from_entry(map: &HashMap<String, redis::Value>) -> BTreeMap<String, String> {
    let mut record = BTreeMap::new();
    for (key, value) in map {
        match redis::from_redis_value::<String>(value) {
            Ok(text) => {
                record.insert(key.clone(), text);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Skipping non-string stream field");
            }
        }
    }
    record
}

// ============================================================================
// StreamPublisher
// ============================================================================

/// Publishes locally originated events to the shared stream.
///
/// Connection acquisition is lazy and the cached connection is discarded on
/// error, so a Redis outage degrades fan-out without affecting ingress.
pub struct StreamPublisher {
    client: redis::Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    settings: StreamSettings,
}

impl StreamPublisher {
    /// Create a publisher. No connection is made until the first publish.
    pub fn new(settings: StreamSettings) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(settings.redis_url.as_str())?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            settings,
        })
    }

    /// Publish one event as a bounded-length stream record.
    pub async fn publish(&self, event: &Event) -> Result<(), redis::RedisError> {
        let record = event.to_stream_record();
        let items: Vec<(String, String)> = record.into_iter().collect();

        let mut conn = self.connection().await?;
        let result: Result<String, redis::RedisError> = conn
            .xadd_maxlen(
                self.settings.stream_key.as_str(),
                StreamMaxlen::Approx(self.settings.maxlen),
                "*",
                &items,
            )
            .await;

        match result {
            Ok(stream_id) => {
                debug!(
                    event_id = %event.event_id,
                    stream_id = %stream_id,
                    "Published event to fan-out stream"
                );
                Ok(())
            }
            Err(e) => {
                // Drop the cached connection so the next publish reconnects.
                *self.connection.lock().await = None;
                Err(e)
            }
        }
    }

    async fn connection(&self) -> Result<MultiplexedConnection, redis::RedisError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }
}

// ============================================================================
// StreamConsumer
// ============================================================================

/// Consumes the shared stream and dispatches peer events locally.
pub struct StreamConsumer {
    client: redis::Client,
    settings: StreamSettings,
    daemon_id: DaemonId,
    dispatcher: Arc<Dispatcher>,
}

impl StreamConsumer {
    /// Initial reconnect backoff after a connection failure.
    const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

    /// Reconnect backoff ceiling.
    const MAX_BACKOFF: Duration = Duration::from_secs(30);

    /// Create a consumer. No connection is made until [`run`](Self::run).
    pub fn new(
        settings: StreamSettings,
        daemon_id: DaemonId,
        dispatcher: Arc<Dispatcher>,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(settings.redis_url.as_str())?;
        Ok(Self {
            client,
            settings,
            daemon_id,
            dispatcher,
        })
    }

    /// Consume until shutdown is signalled.
    ///
    /// The cursor starts at messages published after the consumer came up.
    /// Connection loss re-acquires with bounded backoff inside the loop; a
    /// startup failure never terminates the consumer permanently.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Self::INITIAL_BACKOFF;

        info!(
            stream_key = %self.settings.stream_key,
            daemon_id = %self.daemon_id,
            "Stream consumer started"
        );

        'reconnect: loop {
            if *shutdown.borrow() {
                break;
            }

            let mut conn = match self.client.get_multiplexed_async_connection().await {
                Ok(conn) => {
                    backoff = Self::INITIAL_BACKOFF;
                    conn
                }
                Err(e) => {
                    warn!(error = %e, delay_ms = backoff.as_millis() as u64, "Stream connection failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = shutdown.changed() => {}
                    }
                    backoff = (backoff * 2).min(Self::MAX_BACKOFF);
                    continue;
                }
            };

            let mut last_id = match self.resolve_start_cursor(&mut conn).await {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "Failed to resolve stream cursor, reconnecting");
                    continue;
                }
            };

            loop {
                if *shutdown.borrow() {
                    break 'reconnect;
                }

                let options = StreamReadOptions::default().block(1000).count(100);
                let reply: Result<StreamReadReply, redis::RedisError> = conn
                    .xread_options(
                        &[self.settings.stream_key.as_str()],
                        &[last_id.as_str()],
                        &options,
                    )
                    .await;

                match reply {
                    Ok(reply) => {
                        for key in reply.keys {
                            for entry in key.ids {
                                last_id = entry.id.clone();
                                self.process(&entry.map).await;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Stream read failed, reconnecting");
                        continue 'reconnect;
                    }
                }
            }
        }

        info!("Stream consumer stopped");
    }

    /// Resolve the "messages after I started" cursor to a concrete entry ID
    /// so no record published between reads is missed.
    async fn resolve_start_cursor(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<String, redis::RedisError> {
        let reply: redis::streams::StreamRangeReply = conn
            .xrevrange_count(self.settings.stream_key.as_str(), "+", "-", 1)
            .await?;

        Ok(reply
            .ids
            .first()
            .map(|entry| entry.id.clone())
            .unwrap_or_else(|| "0-0".to_string()))
    }

    /// Decode one record, apply the self-skip, dispatch the rest.
    async fn process(&self, map: &HashMap<String, redis::Value>) {
        let record = record_from_entry(map);

        let event = match Event::from_stream_record(&record) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable stream record");
                return;
            }
        };

        if is_own_event(&event, &self.daemon_id) {
            debug!(
                event_id = %event.event_id,
                "Skipping own event from fan-out stream"
            );
            return;
        }

        let result = self.dispatcher.dispatch(&event).await;
        debug!(
            event_id = %event.event_id,
            matched = result.matched,
            "Dispatched peer event from stream"
        );
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
