//! Shared test utilities: item and feed fixtures, a scripted item source, a
//! recording webhook sink, and proptest generators.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio::sync::Semaphore;

use crate::dispatch::{DeliveryError, WebhookPayload, WebhookSink};
use crate::types::{
    DEFAULT_FEED_BATCH_SIZE, DEFAULT_FEED_INTERVAL_MS, FeedConfig, Item, ItemFields, Rating,
};
use crate::upstream::{FetchRequest, FetchedBatch, ItemSource, UpstreamError};

pub const TEST_BASE_URL: &str = "https://booru.example";

// ─── Fixtures ───

/// A safe-rated PNG with full metadata.
pub fn item(id: u64) -> Item {
    item_with(id, "png", Rating::Safe)
}

pub fn item_with(id: u64, ext: &str, rating: Rating) -> Item {
    Item::from_fields(
        ItemFields {
            id,
            rating,
            artists: vec!["some_artist".into()],
            characters: vec!["hatsune_miku".into()],
            tags: vec!["1girl".into(), "solo".into()],
            copyrights: vec!["vocaloid".into()],
            width: Some(800),
            height: Some(600),
            file_url: Some(format!("https://cdn.example/{id}.{ext}")),
            preview_url: Some(format!("https://cdn.example/preview/{id}.jpg")),
            file_ext: ext.to_string(),
            file_size: 1536,
            ..ItemFields::default()
        },
        TEST_BASE_URL,
    )
}

pub fn feed(name: &str, tags: &[&str]) -> FeedConfig {
    FeedConfig {
        name: name.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        interval_ms: DEFAULT_FEED_INTERVAL_MS,
        batch_size: DEFAULT_FEED_BATCH_SIZE,
        display: None,
        enabled: true,
    }
}

/// Polls `condition` until it holds, advancing (possibly paused) time in
/// small steps. Panics after a minute.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..60_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}

// ─── Scripted item source ───

enum Scripted {
    Items(Vec<u64>),
    Error(String),
}

/// An [`ItemSource`] that replays scripted responses.
///
/// Scripted responses are returned verbatim (unsorted, unfiltered) so callers
/// can exercise re-filtering. Once the script runs out, the source serves its
/// catalog honestly: ids above the cursor, ascending, bounded by the limit.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<VecDeque<Scripted>>,
    catalog: Mutex<Vec<u64>>,
    requests: Mutex<Vec<FetchRequest>>,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(ids: impl IntoIterator<Item = u64>) -> Self {
        let source = Self::new();
        source.extend_catalog(ids);
        source
    }

    pub fn extend_catalog(&self, ids: impl IntoIterator<Item = u64>) {
        let mut catalog = self.catalog.lock().unwrap();
        catalog.extend(ids);
        catalog.sort_unstable();
        catalog.dedup();
    }

    pub fn push_items(&self, ids: impl IntoIterator<Item = u64>) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Items(ids.into_iter().collect()));
    }

    pub fn push_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Error(message.to_string()));
    }

    /// Makes every fetch wait for a permit on the returned semaphore.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        wait_until(|| self.calls() >= n).await;
    }
}

#[async_trait]
impl ItemSource for ScriptedSource {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedBatch, UpstreamError> {
        self.requests.lock().unwrap().push(request.clone());
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let next = self.script.lock().unwrap().pop_front();
        let ids = match next {
            Some(Scripted::Items(ids)) => ids,
            Some(Scripted::Error(message)) => return Err(UpstreamError::Unavailable(message)),
            None => self
                .catalog
                .lock()
                .unwrap()
                .iter()
                .copied()
                .filter(|id| *id > request.after)
                .take(request.limit as usize)
                .collect(),
        };

        Ok(FetchedBatch {
            items: ids.into_iter().map(item).collect(),
            rejected: Vec::new(),
        })
    }
}

// ─── Recording webhook sink ───

/// A [`WebhookSink`] that records every attempt and replays scripted failures
/// per URL. Unscripted attempts succeed.
#[derive(Default)]
pub struct RecordingSink {
    script: Mutex<HashMap<String, VecDeque<Result<(), DeliveryError>>>>,
    attempts: Mutex<Vec<(String, WebhookPayload)>>,
    delivered: Mutex<Vec<(String, WebhookPayload)>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, results: impl IntoIterator<Item = Result<(), DeliveryError>>) {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(results);
    }

    /// Makes every post wait for a permit on the returned semaphore.
    pub fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn attempts_to(&self, url: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .count()
    }

    pub fn total_attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    /// Item ids successfully delivered to `url`, in delivery order.
    pub fn delivered_ids(&self, url: &str) -> Vec<u64> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .filter_map(|(_, payload)| payload_item_id(payload))
            .collect()
    }

    pub fn delivered_payloads(&self, url: &str) -> Vec<WebhookPayload> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == url)
            .map(|(_, p)| p.clone())
            .collect()
    }

    pub async fn wait_for_attempts(&self, n: usize) {
        wait_until(|| self.total_attempts() >= n).await;
    }

    pub async fn wait_for_deliveries(&self, n: usize) {
        wait_until(|| self.delivered.lock().unwrap().len() >= n).await;
    }
}

/// Recovers the item id from the embed's canonical post URL.
fn payload_item_id(payload: &WebhookPayload) -> Option<u64> {
    payload.embeds.first()?.url.rsplit('/').next()?.parse().ok()
}

#[async_trait]
impl WebhookSink for RecordingSink {
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        self.attempts
            .lock()
            .unwrap()
            .push((url.to_string(), payload.clone()));

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.unwrap().forget();
        }

        let scripted = self
            .script
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front);
        let result = scripted.unwrap_or(Ok(()));
        if result.is_ok() {
            self.delivered
                .lock()
                .unwrap()
                .push((url.to_string(), payload.clone()));
        }
        result
    }
}

// ─── Generators ───

pub fn arb_tag() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9_]{0,12}".prop_map(String::from)
}

pub fn arb_tags() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_tag(), 1..6)
}

/// Batches of item ids as an upstream might return them: unsorted, possibly
/// overlapping the cursor, possibly repeated.
pub fn arb_id_batches() -> impl Strategy<Value = Vec<Vec<u64>>> {
    prop::collection::vec(prop::collection::vec(1u64..500, 0..8), 1..8)
}
