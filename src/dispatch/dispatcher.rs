//! Per-feed webhook dispatcher.
//!
//! A dispatcher is created when a feed starts and subscribed on the bus under
//! the feed's tag key. For every published item it:
//!
//! 1. claims `"<feed>:<item id>"` in the shared [`DedupeCache`] (repeats are
//!    skipped),
//! 2. renders the payload once,
//! 3. enqueues it on every destination's queue.
//!
//! Each destination owns a bounded queue drained by its own worker task, so
//! deliveries to one destination are serial and in publish order while a slow
//! or failing destination never holds up the others.
//!
//! Enqueueing never blocks the publisher. A full queue drops the item for that
//! destination with a warning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use super::render::{WebhookPayload, render_item};
use super::retry::{DeliveryOutcome, DeliveryRetryConfig, deliver_with_retry};
use super::sink::WebhookSink;
use crate::bus::HandlerError;
use crate::dedupe::DedupeCache;
use crate::types::{FeedConfig, Item, ItemId, WebhookDestination};

/// Default capacity of each destination queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Tunables shared by every dispatcher of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub retry: DeliveryRetryConfig,
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            retry: DeliveryRetryConfig::DEFAULT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Counters for one dispatcher.
#[derive(Debug, Default)]
struct Counters {
    sent: AtomicU64,
    abandoned: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of a dispatcher's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct DispatchStats {
    /// Deliveries that reached `Sent`.
    pub sent: u64,
    /// Deliveries that reached `Abandoned`.
    pub abandoned: u64,
    /// Items skipped because the dedupe claim failed.
    pub duplicates: u64,
    /// Deliveries dropped because a destination queue was full or closed.
    pub dropped: u64,
}

struct DeliveryJob {
    item_id: ItemId,
    payload: Arc<WebhookPayload>,
}

struct DestinationQueue {
    webhook: WebhookDestination,
    tx: mpsc::Sender<DeliveryJob>,
}

/// Fan-out from one feed to its webhook destinations.
pub struct WebhookDispatcher {
    feed: FeedConfig,
    destinations: Vec<WebhookDestination>,
    dedupe: Arc<DedupeCache>,
    /// Emptied by [`WebhookDispatcher::close`], which drops the senders.
    queues: RwLock<Vec<DestinationQueue>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for WebhookDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookDispatcher")
            .field("feed", &self.feed.name)
            .field("destinations", &self.destinations)
            .finish_non_exhaustive()
    }
}

impl WebhookDispatcher {
    /// Spawns one worker per destination. Must be called inside a runtime.
    pub fn spawn(
        feed: FeedConfig,
        destinations: Vec<WebhookDestination>,
        sink: Arc<dyn WebhookSink>,
        dedupe: Arc<DedupeCache>,
        config: DispatcherConfig,
    ) -> Self {
        let counters = Arc::new(Counters::default());
        let mut queues = Vec::with_capacity(destinations.len());
        let mut workers = Vec::with_capacity(destinations.len());

        for webhook in &destinations {
            let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
            let span = info_span!("delivery", feed = %feed.name, webhook = %webhook.name);
            workers.push(tokio::spawn(
                run_destination(
                    webhook.url.clone(),
                    rx,
                    Arc::clone(&sink),
                    config.retry,
                    Arc::clone(&counters),
                )
                .instrument(span),
            ));
            queues.push(DestinationQueue {
                webhook: webhook.clone(),
                tx,
            });
        }

        info!(feed = %feed.name, destinations = destinations.len(), "Dispatcher started");
        WebhookDispatcher {
            feed,
            destinations,
            dedupe,
            queues: RwLock::new(queues),
            workers: Mutex::new(workers),
            counters,
        }
    }

    pub fn destinations(&self) -> &[WebhookDestination] {
        &self.destinations
    }

    pub fn dedupe_key(&self, id: ItemId) -> String {
        format!("{}:{}", self.feed.name, id.0)
    }

    /// Bus handler: claims, renders and enqueues `item`.
    pub fn handle_item(&self, item: &Arc<Item>) -> Result<(), HandlerError> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        if queues.is_empty() {
            return Err(HandlerError::new(format!(
                "dispatcher for feed {} is closed",
                self.feed.name
            )));
        }

        if !self.dedupe.try_claim(&self.dedupe_key(item.id)) {
            self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            debug!(feed = %self.feed.name, item_id = %item.id, "Already delivered recently, skipping");
            return Ok(());
        }

        let payload = Arc::new(render_item(item, self.feed.display.as_ref()));
        for queue in queues.iter() {
            let job = DeliveryJob {
                item_id: item.id,
                payload: Arc::clone(&payload),
            };
            if let Err(e) = queue.tx.try_send(job) {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "worker gone",
                };
                warn!(
                    feed = %self.feed.name,
                    webhook = %queue.webhook.name,
                    item_id = %item.id,
                    reason,
                    "Dropping delivery"
                );
            }
        }
        Ok(())
    }

    /// Stops accepting items. Queued jobs still drain.
    pub fn close(&self) {
        let closed = std::mem::take(&mut *self.queues.write().unwrap_or_else(PoisonError::into_inner));
        if !closed.is_empty() {
            debug!(feed = %self.feed.name, "Dispatcher closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Closes the dispatcher and waits for every worker to drain its queue.
    pub async fn shutdown(&self) {
        self.close();
        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(e) = worker.await {
                warn!(feed = %self.feed.name, error = %e, "Delivery worker panicked");
            }
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            duplicates: self.counters.duplicates.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_destination(
    url: String,
    mut rx: mpsc::Receiver<DeliveryJob>,
    sink: Arc<dyn WebhookSink>,
    retry: DeliveryRetryConfig,
    counters: Arc<Counters>,
) {
    debug!("Delivery worker started");
    while let Some(job) = rx.recv().await {
        match deliver_with_retry(sink.as_ref(), &url, &job.payload, &retry).await {
            DeliveryOutcome::Sent { attempts } => {
                counters.sent.fetch_add(1, Ordering::Relaxed);
                debug!(item_id = %job.item_id, attempt = attempts, "Delivered");
            }
            DeliveryOutcome::Abandoned {
                attempts,
                last_error,
            } => {
                counters.abandoned.fetch_add(1, Ordering::Relaxed);
                warn!(
                    item_id = %job.item_id,
                    attempt = attempts,
                    error = %last_error,
                    "Delivery abandoned"
                );
            }
        }
    }
    debug!("Delivery worker stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dispatch::sink::DeliveryError;
    use crate::test_utils::{RecordingSink, feed, item};

    const A: &str = "https://hooks.example/a";
    const B: &str = "https://hooks.example/b";

    fn destinations() -> Vec<WebhookDestination> {
        vec![
            WebhookDestination::new("a", A),
            WebhookDestination::new("b", B),
        ]
    }

    fn dispatcher(sink: &Arc<RecordingSink>, dedupe: &Arc<DedupeCache>) -> WebhookDispatcher {
        WebhookDispatcher::spawn(
            feed("cats", &["cat"]),
            destinations(),
            Arc::clone(sink) as Arc<dyn WebhookSink>,
            Arc::clone(dedupe),
            DispatcherConfig::default(),
        )
    }

    #[tokio::test]
    async fn every_destination_receives_items_in_order() {
        let sink = Arc::new(RecordingSink::new());
        let dedupe = Arc::new(DedupeCache::default());
        let dispatcher = dispatcher(&sink, &dedupe);

        for id in [101, 102, 103] {
            dispatcher.handle_item(&Arc::new(item(id))).unwrap();
        }
        dispatcher.shutdown().await;

        assert_eq!(sink.delivered_ids(A), vec![101, 102, 103]);
        assert_eq!(sink.delivered_ids(B), vec![101, 102, 103]);
        assert_eq!(dispatcher.stats().sent, 6);
    }

    #[tokio::test]
    async fn repeated_item_is_delivered_once() {
        let sink = Arc::new(RecordingSink::new());
        let dedupe = Arc::new(DedupeCache::default());
        let dispatcher = dispatcher(&sink, &dedupe);
        let item = Arc::new(item(7));

        dispatcher.handle_item(&item).unwrap();
        dispatcher.handle_item(&item).unwrap();
        dispatcher.shutdown().await;

        assert_eq!(sink.delivered_ids(A), vec![7]);
        assert_eq!(dispatcher.stats().duplicates, 1);
        assert!(!dedupe.try_claim("cats:7"));
    }

    #[tokio::test]
    async fn dedupe_is_scoped_per_feed() {
        let sink = Arc::new(RecordingSink::new());
        let dedupe = Arc::new(DedupeCache::default());
        let cats = dispatcher(&sink, &dedupe);
        let other = WebhookDispatcher::spawn(
            feed("other", &["cat"]),
            vec![WebhookDestination::new("c", "https://hooks.example/c")],
            Arc::clone(&sink) as Arc<dyn WebhookSink>,
            Arc::clone(&dedupe),
            DispatcherConfig::default(),
        );
        let item = Arc::new(item(7));

        cats.handle_item(&item).unwrap();
        other.handle_item(&item).unwrap();
        cats.shutdown().await;
        other.shutdown().await;

        assert_eq!(sink.delivered_ids("https://hooks.example/c"), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_destination_does_not_affect_others() {
        let sink = Arc::new(RecordingSink::new());
        sink.script(
            A,
            (0..5).map(|_| Err(DeliveryError::rate_limited(Duration::from_secs(2)))),
        );
        let dedupe = Arc::new(DedupeCache::default());
        let dispatcher = dispatcher(&sink, &dedupe);

        dispatcher.handle_item(&Arc::new(item(1))).unwrap();
        dispatcher.shutdown().await;

        assert_eq!(sink.attempts_to(A), 5);
        assert!(sink.delivered_ids(A).is_empty());
        assert_eq!(sink.delivered_ids(B), vec![1]);
        let stats = dispatcher.stats();
        assert_eq!((stats.sent, stats.abandoned), (1, 1));
    }

    #[tokio::test]
    async fn closed_dispatcher_rejects_items() {
        let sink = Arc::new(RecordingSink::new());
        let dedupe = Arc::new(DedupeCache::default());
        let dispatcher = dispatcher(&sink, &dedupe);

        dispatcher.close();

        assert!(dispatcher.is_closed());
        assert!(dispatcher.handle_item(&Arc::new(item(1))).is_err());
        // The item was never claimed, so a later dispatcher may deliver it.
        assert!(dedupe.try_claim("cats:1"));
        dispatcher.shutdown().await;
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let sink = Arc::new(RecordingSink::new());
        let gate = sink.hold();
        let dedupe = Arc::new(DedupeCache::default());
        let dispatcher = WebhookDispatcher::spawn(
            feed("cats", &["cat"]),
            vec![WebhookDestination::new("a", A)],
            Arc::clone(&sink) as Arc<dyn WebhookSink>,
            dedupe,
            DispatcherConfig {
                queue_capacity: 1,
                ..DispatcherConfig::default()
            },
        );

        // First job is picked up by the worker and parks on the gate.
        dispatcher.handle_item(&Arc::new(item(1))).unwrap();
        sink.wait_for_attempts(1).await;
        // Second fills the queue, third overflows it.
        dispatcher.handle_item(&Arc::new(item(2))).unwrap();
        dispatcher.handle_item(&Arc::new(item(3))).unwrap();
        gate.add_permits(10);
        dispatcher.shutdown().await;

        assert_eq!(sink.delivered_ids(A), vec![1, 2]);
        assert_eq!(dispatcher.stats().dropped, 1);
    }
}
