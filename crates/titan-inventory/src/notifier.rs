//! # Event Notifier
//!
//! In-process publish/subscribe for cycle completions and settings changes.
//!
//! ## Delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  publish(StockCompleted, outcome)                                       │
//! │       │                                                                 │
//! │       ├──► handler A   (called on the publisher's task)                 │
//! │       ├──► handler B   panics → logged, delivery continues              │
//! │       └──► forwarder   → broadcast::Sender → GET /events sockets        │
//! │                                                                         │
//! │  Best effort: subscribers present at publish time only, no replay.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Notification channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEvent {
    ManualCompleted,
    ProductsCompleted,
    /// Stock pull, bulk update and sale-triggered cycles.
    StockCompleted,
    ConfigUpdated,
}

impl SyncEvent {
    pub const ALL: [SyncEvent; 4] = [
        SyncEvent::ManualCompleted,
        SyncEvent::ProductsCompleted,
        SyncEvent::StockCompleted,
        SyncEvent::ConfigUpdated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEvent::ManualCompleted => "manual_completed",
            SyncEvent::ProductsCompleted => "products_completed",
            SyncEvent::StockCompleted => "stock_completed",
            SyncEvent::ConfigUpdated => "config_updated",
        }
    }
}

impl std::fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A published event as forwarded to external observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: SyncEvent,
    pub payload: Value,
}

type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<SyncEvent, Vec<(u64, Handler)>>>,
}

impl Registry {
    fn remove(&self, event: SyncEvent, id: u64) {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = handlers.get_mut(&event) {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }
}

/// Fan-out of engine events to in-process handlers.
#[derive(Clone, Default)]
pub struct EventNotifier {
    registry: Arc<Registry>,
}

impl EventNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event`. It stays registered until the
    /// returned [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, event: SyncEvent, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            id,
            event,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Forwards every event type into `sender`.
    pub fn subscribe_all(&self, sender: broadcast::Sender<EventEnvelope>) -> Vec<Subscription> {
        SyncEvent::ALL
            .iter()
            .map(|&event| {
                let sender = sender.clone();
                self.subscribe(event, move |payload| {
                    // No receivers is fine
                    let _ = sender.send(EventEnvelope {
                        event,
                        payload: payload.clone(),
                    });
                })
            })
            .collect()
    }

    /// Delivers `payload` to the current subscribers of `event`, in
    /// subscription order. Returns how many handlers ran to completion.
    pub fn publish(&self, event: SyncEvent, payload: Value) -> usize {
        let handlers: Vec<Handler> = self
            .registry
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        let mut delivered = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&payload))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(event = %event, "Event handler panicked"),
            }
        }
        trace!(event = %event, delivered, "Event published");
        delivered
    }

    /// Serializes `payload` and publishes it. Serialization failures are
    /// logged and dropped.
    pub fn publish_json<T: Serialize>(&self, event: SyncEvent, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => {
                self.publish(event, value);
            }
            Err(e) => warn!(event = %event, error = %e, "Failed to serialize event payload"),
        }
    }
}

/// Handle of one registered handler.
#[must_use = "dropping a Subscription unsubscribes the handler"]
pub struct Subscription {
    id: u64,
    event: SyncEvent,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn event(&self) -> SyncEvent {
        self.event
    }

    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.event, self.id);
        }
    }
}
