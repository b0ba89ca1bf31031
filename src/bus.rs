//! Typed publish/subscribe fan-out keyed by tag key.
//!
//! The bus is an explicit topic registry: each [`TagKey`] maps to an ordered
//! list of subscribers for one item type `T`. Publishing is synchronous and
//! unbuffered. Subscribers run in subscription order on the publisher's task;
//! a topic with no subscribers drops the item.
//!
//! Handlers are expected to be quick (the dispatcher only enqueues). A handler
//! that returns an error or panics is logged and counted, and the remaining
//! handlers still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{trace, warn};

use crate::types::TagKey;

/// Error returned by a subscriber that could not accept an event.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError(message.into())
    }
}

/// Handle identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(&T) -> Result<(), HandlerError> + Send + Sync>;

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers invoked.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// Synchronous fan-out bus.
pub struct EventBus<T> {
    topics: RwLock<HashMap<TagKey, Vec<(SubscriptionId, Handler<T>)>>>,
    next_id: AtomicU64,
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T> EventBus<T> {
    pub fn new() -> Self {
        EventBus {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Adds `handler` to the end of `topic`'s subscriber list.
    pub fn subscribe<F>(&self, topic: &TagKey, handler: F) -> SubscriptionId
    where
        F: Fn(&T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(topic.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes a subscription. Returns `false` if it was not registered on `topic`.
    pub fn unsubscribe(&self, topic: &TagKey, id: SubscriptionId) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(|e| e.into_inner());
        let Some(handlers) = topics.get_mut(topic) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sub, _)| *sub != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    /// Number of subscribers currently on `topic`.
    pub fn subscriber_count(&self, topic: &TagKey) -> usize {
        let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
        topics.get(topic).map_or(0, Vec::len)
    }

    /// Invokes every subscriber of `topic` with `event`, in subscription order.
    ///
    /// The subscriber list is snapshotted before any handler runs, so handlers
    /// may subscribe or unsubscribe without deadlocking.
    pub fn publish(&self, topic: &TagKey, event: &T) -> PublishReport {
        let handlers: Vec<(SubscriptionId, Handler<T>)> = {
            let topics = self.topics.read().unwrap_or_else(|e| e.into_inner());
            match topics.get(topic) {
                Some(list) => list.clone(),
                None => {
                    trace!(tag_key = %topic, "No subscribers, dropping event");
                    return PublishReport::default();
                }
            }
        };

        let mut report = PublishReport::default();
        for (id, handler) in handlers {
            report.delivered += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(tag_key = %topic, subscription = id.0, error = %e, "Subscriber failed");
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(tag_key = %topic, subscription = id.0, "Subscriber panicked");
                }
            }
        }
        report
    }
}
