//! Broadcast handler registry keyed by normalized event type.
//!
//! Handlers are plain callbacks invoked synchronously on the connection
//! task, in the order they were first registered. Each key holds a set: the
//! same handler (by `Arc` identity) registered twice under one key shares a
//! single slot, and unsubscribing through either handle removes it.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, warn};

use super::types::EventKey;
use crate::envelope::Envelope;

/// A broadcast subscriber.
pub type Handler = Arc<dyn Fn(&Envelope) + Send + Sync>;

struct HandlerSlot {
    id: u64,
    handler: Handler,
}

/// Lock-free registry of event key to ordered handler set.
///
/// Lives as long as the client, independent of any single connection.
pub struct HandlerRegistry {
    handlers: scc::HashMap<EventKey, Vec<HandlerSlot>>,
    next_id: AtomicU64,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: scc::HashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `handler` for `event_type`, returning the handle that removes it.
    pub fn subscribe(self: &Arc<Self>, event_type: &str, handler: Handler) -> Subscription {
        let key = EventKey::new(event_type);
        if key.is_empty() {
            warn!(event_type, "Subscribing to an empty event type; it will never match");
        }
        let slot = self.register(key.clone(), handler);
        Subscription {
            key,
            slot,
            registry: Arc::clone(self),
            active: true,
        }
    }

    /// Add `handler` to the set under `key`, returning its slot id.
    ///
    /// A handler already in the set keeps its slot and position.
    fn register(&self, key: EventKey, handler: Handler) -> u64 {
        loop {
            let existing = self.handlers.update_sync(&key, |_, slots| {
                if let Some(slot) = slots
                    .iter()
                    .find(|slot| Arc::ptr_eq(&slot.handler, &handler))
                {
                    return slot.id;
                }
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                slots.push(HandlerSlot {
                    id,
                    handler: Arc::clone(&handler),
                });
                id
            });
            if let Some(id) = existing {
                return id;
            }

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let slot = HandlerSlot {
                id,
                handler: Arc::clone(&handler),
            };
            // Another subscriber may have created the key in the meantime.
            if self.handlers.insert_sync(key.clone(), vec![slot]).is_ok() {
                return id;
            }
        }
    }

    /// Remove slot `id` under `key`.
    ///
    /// Returns `true` if the slot was still registered. The key is removed
    /// once its handler set is empty.
    fn unregister(&self, key: &EventKey, id: u64) -> bool {
        let removed = self
            .handlers
            .update_sync(key, |_, slots| {
                let before = slots.len();
                slots.retain(|slot| slot.id != id);
                slots.len() != before
            })
            .unwrap_or(false);

        self.handlers.remove_if_sync(key, |slots| slots.is_empty());
        removed
    }

    /// Invoke every handler registered for the envelope's event type.
    ///
    /// Handlers run in insertion order against a snapshot taken before the
    /// first call, so a handler that subscribes or unsubscribes only affects
    /// later messages. A panicking handler is logged and skipped.
    ///
    /// Returns the number of handlers invoked.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let event_type = envelope.event_type().unwrap_or_default();
        let key = EventKey::new(event_type);
        if key.is_empty() {
            debug!("Dropping message without a routable event type");
            return 0;
        }

        let Some(handlers) = self.handlers.update_sync(&key, |_, slots| {
            slots
                .iter()
                .map(|slot| Arc::clone(&slot.handler))
                .collect::<Vec<_>>()
        }) else {
            debug!(event_type, "No subscribers; dropping message");
            return 0;
        };

        for handler in &handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                warn!(
                    event_type,
                    panic = panic_message(panic.as_ref()),
                    "Subscriber panicked"
                );
            }
        }
        handlers.len()
    }

    /// Number of distinct handlers registered under `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .update_sync(&EventKey::new(event_type), |_, slots| slots.len())
            .unwrap_or(0)
    }

    /// All keys that currently have at least one handler.
    pub fn keys(&self) -> Vec<EventKey> {
        let mut keys = Vec::new();
        self.handlers.retain_sync(|key, _| {
            keys.push(key.clone());
            true
        });
        keys
    }

    /// Get the total number of keys.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}

/// Handle to one handler registration.
///
/// Dropping it unsubscribes. Call [`Subscription::detach`] to keep the
/// handler registered for the lifetime of the client instead.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    key: EventKey,
    slot: u64,
    registry: Arc<HandlerRegistry>,
    active: bool,
}

impl Subscription {
    /// The normalized key this handler is registered under.
    pub fn event_key(&self) -> &EventKey {
        &self.key
    }

    /// Remove this handler from its key.
    ///
    /// Returns `false` if it was already removed, for example through another
    /// handle to the same handler.
    pub fn unsubscribe(mut self) -> bool {
        self.active = false;
        self.registry.unregister(&self.key, self.slot)
    }

    /// Keep the handler registered without holding the handle.
    pub fn detach(mut self) {
        self.active = false;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.active {
            self.registry.unregister(&self.key, self.slot);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("slot", &self.slot)
            .field("active", &self.active)
            .finish()
    }
}
