//! # Dispatcher
//!
//! The hub of the hook core: given an event, finds matching contracts and
//! routes each match to its target — handler targets are scheduled on the
//! executor as fire-and-forget tasks, URL targets become outbox rows.
//!
//! The dispatcher performs no network I/O itself; outbox insertion is its
//! only durable side effect. Failures never escape the dispatch boundary:
//! they are logged per contract and surface in the [`DispatchResult`].

use crate::contract::ContractTarget;
use crate::event::Event;
use crate::handler::HandlerExecutor;
use crate::registry::ContractRegistry;
use crate::EventId;
use hookbridge_outbox::{InsertOutcome, NewOutboxEntry, OutboxStore};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// DispatchResult
// ============================================================================

/// Outcome summary of one dispatch call.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    /// Event that was dispatched
    pub event_id: EventId,

    /// How many contracts matched
    pub matched: usize,

    /// Handler invocations scheduled on the executor
    pub handlers_spawned: usize,

    /// Outbox rows inserted (deduplicated rows do not count)
    pub outbox_enqueued: usize,

    /// Per-contract routing failures, already logged
    pub errors: Vec<String>,
}

impl DispatchResult {
    /// Check whether any contract matched.
    pub fn was_matched(&self) -> bool {
        self.matched > 0
    }

    /// Check whether every matched contract was routed without error.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Central matching-and-routing component.
///
/// # Examples
///
/// ```rust,no_run
/// use hookbridge_core::{Dispatcher, Event, HandlerExecutor, HandlerRegistry};
/// use hookbridge_core::registry::ContractRegistry;
/// use hookbridge_outbox::MemoryOutboxStore;
/// use std::sync::Arc;
///
/// # async fn example() {
/// let contracts = Arc::new(ContractRegistry::new());
/// let handlers = Arc::new(HandlerRegistry::new());
/// let executor = Arc::new(HandlerExecutor::new(handlers));
/// let outbox = Arc::new(MemoryOutboxStore::new());
///
/// let dispatcher = Dispatcher::new(contracts, executor, outbox);
/// let event = Event::new("github", "push").unwrap();
/// let result = dispatcher.dispatch(&event).await;
/// # }
/// ```
pub struct Dispatcher {
    contracts: Arc<ContractRegistry>,
    executor: Arc<HandlerExecutor>,
    outbox: Arc<dyn OutboxStore>,
}

impl Dispatcher {
    /// Create a dispatcher over the given components.
    pub fn new(
        contracts: Arc<ContractRegistry>,
        executor: Arc<HandlerExecutor>,
        outbox: Arc<dyn OutboxStore>,
    ) -> Self {
        Self {
            contracts,
            executor,
            outbox,
        }
    }

    /// The contract registry this dispatcher matches against.
    pub fn contracts(&self) -> &Arc<ContractRegistry> {
        &self.contracts
    }

    /// Route one event to every matching contract.
    ///
    /// Matches are processed sequentially in contract-iteration order.
    /// Zero matches is not an error; it is logged at debug and the call
    /// still succeeds.
    pub async fn dispatch(&self, event: &Event) -> DispatchResult {
        let matched_contracts = self.contracts.matching(event);

        let mut result = DispatchResult {
            event_id: event.event_id,
            matched: matched_contracts.len(),
            handlers_spawned: 0,
            outbox_enqueued: 0,
            errors: Vec::new(),
        };

        if matched_contracts.is_empty() {
            debug!(
                event_id = %event.event_id,
                source = %event.source,
                event_type = %event.event_type,
                "No contract matched event"
            );
            return result;
        }

        for contract in &matched_contracts {
            match &contract.target {
                ContractTarget::Handler { name } => {
                    if self.executor.spawn(name, event.clone()) {
                        result.handlers_spawned += 1;
                    }
                }
                ContractTarget::Url {
                    url,
                    signing_secret,
                    timeout,
                } => {
                    let payload = match serde_json::to_value(event) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(
                                event_id = %event.event_id,
                                contract_id = %contract.id,
                                error = %e,
                                "Failed to serialize envelope for outbox"
                            );
                            result.errors.push(format!("{}: {}", contract.id, e));
                            continue;
                        }
                    };

                    let entry = NewOutboxEntry {
                        contract_id: contract.id.to_string(),
                        event_id: event.event_id.to_string(),
                        url: url.to_string(),
                        signing_secret: signing_secret.clone(),
                        timeout: *timeout,
                        payload,
                    };

                    match self.outbox.insert(entry).await {
                        Ok(InsertOutcome::Inserted(entry_id)) => {
                            debug!(
                                event_id = %event.event_id,
                                contract_id = %contract.id,
                                entry_id = %entry_id,
                                "Outbox row inserted"
                            );
                            result.outbox_enqueued += 1;
                        }
                        Ok(InsertOutcome::AlreadyQueued(entry_id)) => {
                            debug!(
                                event_id = %event.event_id,
                                contract_id = %contract.id,
                                entry_id = %entry_id,
                                "Delivery already queued, reusing row"
                            );
                        }
                        Err(e) => {
                            warn!(
                                event_id = %event.event_id,
                                contract_id = %contract.id,
                                error = %e,
                                "Outbox insertion failed"
                            );
                            result.errors.push(format!("{}: {}", contract.id, e));
                        }
                    }
                }
            }
        }

        info!(
            event_id = %event.event_id,
            source = %event.source,
            event_type = %event.event_type,
            matched = result.matched,
            handlers = result.handlers_spawned,
            outbox = result.outbox_enqueued,
            "Dispatched event"
        );

        result
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
