//! Feed and webhook registry.
//!
//! The registry owns the durable feed/webhook rows and the set of *active*
//! feeds. An active feed has a running [`WebhookDispatcher`] subscribed on the
//! bus under the feed's tag key, and that key is registered and started in
//! the scheduler.
//!
//! # Invariants
//!
//! - Every active feed name is a stored feed name. A feed is stopped before
//!   its row is deleted.
//! - A tag key is registered in the scheduler exactly while at least one
//!   active feed uses it, and its config is the merge of those feeds'
//!   configs (fastest interval, largest batch).
//! - Durable writes happen before runtime changes. A failed write leaves both
//!   the store and the runtime as they were.
//!
//! All mutations are serialized by an async mutex over the active set.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use super::error::RegistryError;
use super::validate::{validate_feed, validate_name, validate_url};
use crate::bus::SubscriptionId;
use crate::dedupe::DedupeCache;
use crate::dispatch::{DispatchStats, DispatcherConfig, WebhookDispatcher, WebhookSink};
use crate::persistence::{CursorStore, Store, StoreSnapshot, WebhookRow};
use crate::scheduler::{PollConfig, TagScheduler};
use crate::types::{
    DEFAULT_FEED_BATCH_SIZE, DEFAULT_FEED_INTERVAL_MS, DisplayIdentity, FeedConfig, TagKey,
    WebhookDestination,
};

// ─── Request and view types ───

/// A new webhook.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WebhookSpec {
    pub name: String,
    pub url: String,
}

/// Changes to an existing webhook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WebhookUpdate {
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookView {
    pub name: String,
    pub url: String,
    /// Feeds that deliver to this webhook.
    pub feeds: Vec<String>,
}

/// A new feed. Omitted interval and batch size take the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedSpec {
    pub name: String,
    pub tags: Vec<String>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub batch_size: Option<u32>,
    #[serde(default)]
    pub display: Option<DisplayIdentity>,
    /// Webhook names this feed delivers to.
    #[serde(default)]
    pub webhooks: Vec<String>,
}

/// Changes to an existing feed. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FeedUpdate {
    pub tags: Option<Vec<String>>,
    pub interval_ms: Option<u64>,
    pub batch_size: Option<u32>,
    pub display: Option<DisplayIdentity>,
    pub webhooks: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedView {
    #[serde(flatten)]
    pub config: FeedConfig,
    pub tag_key: Option<TagKey>,
    pub webhooks: Vec<String>,
    pub active: bool,
    /// Delivery counters since the feed was last started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<DispatchStats>,
}

// ─── Registry ───

struct ActiveFeed {
    config: FeedConfig,
    tag_key: TagKey,
    subscription: SubscriptionId,
    dispatcher: Arc<WebhookDispatcher>,
}

type ActiveSet = HashMap<String, ActiveFeed>;

/// Shared dependencies handed to the registry by the engine.
pub struct RegistryDeps {
    pub store: Arc<Store>,
    pub cursors: CursorStore,
    pub scheduler: Arc<TagScheduler>,
    pub sink: Arc<dyn WebhookSink>,
    pub dedupe: Arc<DedupeCache>,
    pub dispatch: DispatcherConfig,
}

pub struct FeedRegistry {
    store: Arc<Store>,
    cursors: CursorStore,
    scheduler: Arc<TagScheduler>,
    sink: Arc<dyn WebhookSink>,
    dedupe: Arc<DedupeCache>,
    dispatch: DispatcherConfig,
    active: Mutex<ActiveSet>,
}

impl std::fmt::Debug for FeedRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRegistry")
            .field("store", &self.store.path())
            .finish_non_exhaustive()
    }
}

impl FeedRegistry {
    pub fn new(deps: RegistryDeps) -> Self {
        FeedRegistry {
            store: deps.store,
            cursors: deps.cursors,
            scheduler: deps.scheduler,
            sink: deps.sink,
            dedupe: deps.dedupe,
            dispatch: deps.dispatch,
            active: Mutex::new(HashMap::new()),
        }
    }

    pub fn scheduler(&self) -> &Arc<TagScheduler> {
        &self.scheduler
    }

    // ─── Webhooks ───

    pub fn list_webhooks(&self) -> Vec<WebhookView> {
        self.store.read(|s| {
            s.webhooks
                .iter()
                .map(|(name, row)| webhook_view(s, name, row))
                .collect()
        })
    }

    pub fn get_webhook(&self, name: &str) -> Result<WebhookView, RegistryError> {
        self.store.read(|s| {
            s.webhooks
                .get(name)
                .map(|row| webhook_view(s, name, row))
                .ok_or_else(|| RegistryError::webhook_not_found(name))
        })
    }

    #[instrument(skip(self, spec), fields(webhook = %spec.name))]
    pub async fn create_webhook(&self, spec: WebhookSpec) -> Result<WebhookView, RegistryError> {
        validate_name("webhook", &spec.name)?;
        validate_url("url", &spec.url)?;
        let _active = self.active.lock().await;

        let view = self.store.update(|s| {
            if s.webhooks.contains_key(&spec.name) {
                return Err(RegistryError::Duplicate {
                    kind: "webhook",
                    value: spec.name.clone(),
                });
            }
            ensure_url_free(s, &spec.url, None)?;
            let row = WebhookRow {
                url: spec.url.clone(),
            };
            let view = webhook_view(s, &spec.name, &row);
            s.webhooks.insert(spec.name.clone(), row);
            Ok(view)
        })?;
        info!("Webhook created");
        Ok(view)
    }

    #[instrument(skip(self, update))]
    pub async fn update_webhook(
        &self,
        webhook: &str,
        update: WebhookUpdate,
    ) -> Result<WebhookView, RegistryError> {
        if let Some(url) = &update.url {
            validate_url("url", url)?;
        }
        let mut active = self.active.lock().await;

        let view = self.store.update(|s| {
            if !s.webhooks.contains_key(webhook) {
                return Err(RegistryError::webhook_not_found(webhook));
            }
            if let Some(url) = &update.url {
                ensure_url_free(s, url, Some(webhook))?;
            }
            let row = s
                .webhooks
                .get_mut(webhook)
                .ok_or_else(|| RegistryError::webhook_not_found(webhook))?;
            if let Some(url) = update.url {
                row.url = url;
            }
            let row = row.clone();
            Ok(webhook_view(s, webhook, &row))
        })?;

        for feed in &view.feeds {
            self.refresh_dispatcher(&mut active, feed)?;
        }
        info!("Webhook updated");
        Ok(view)
    }

    /// Deletes a webhook and its feed links. Active feeds that delivered to it
    /// carry on with their remaining destinations, or stop if none remain.
    #[instrument(skip(self))]
    pub async fn delete_webhook(&self, webhook: &str) -> Result<(), RegistryError> {
        let mut active = self.active.lock().await;

        let feeds = self.store.update(|s| {
            if s.webhooks.remove(webhook).is_none() {
                return Err(RegistryError::webhook_not_found(webhook));
            }
            let feeds = s.feeds_of(webhook);
            s.feeds_webhooks.retain(|(_, w)| w != webhook);
            Ok(feeds)
        })?;

        for feed in &feeds {
            self.refresh_dispatcher(&mut active, feed)?;
        }
        info!(affected_feeds = feeds.len(), "Webhook deleted");
        Ok(())
    }

    // ─── Feeds ───

    pub async fn list_feeds(&self) -> Vec<FeedView> {
        let active = self.active.lock().await;
        self.store.read(|s| {
            s.feeds
                .values()
                .map(|config| feed_view(s, &active, config))
                .collect()
        })
    }

    pub async fn get_feed(&self, name: &str) -> Result<FeedView, RegistryError> {
        let active = self.active.lock().await;
        self.store.read(|s| {
            s.feeds
                .get(name)
                .map(|config| feed_view(s, &active, config))
                .ok_or_else(|| RegistryError::feed_not_found(name))
        })
    }

    /// Creates a stopped feed. Every referenced webhook must exist.
    #[instrument(skip(self, spec), fields(feed = %spec.name))]
    pub async fn create_feed(&self, spec: FeedSpec) -> Result<FeedView, RegistryError> {
        let config = FeedConfig {
            name: spec.name,
            tags: spec.tags,
            interval_ms: spec.interval_ms.unwrap_or(DEFAULT_FEED_INTERVAL_MS),
            batch_size: spec.batch_size.unwrap_or(DEFAULT_FEED_BATCH_SIZE),
            display: spec.display,
            enabled: false,
        };
        validate_feed(&config)?;
        let active = self.active.lock().await;

        let view = self.store.update(|s| {
            if s.feeds.contains_key(&config.name) {
                return Err(RegistryError::Duplicate {
                    kind: "feed",
                    value: config.name.clone(),
                });
            }
            ensure_webhooks_exist(s, &spec.webhooks)?;
            s.feeds.insert(config.name.clone(), config.clone());
            link_webhooks(s, &config.name, &spec.webhooks);
            Ok(feed_view(s, &active, &config))
        })?;
        info!(tag_key = ?view.tag_key, "Feed created");
        Ok(view)
    }

    /// Updates a feed. An active feed is restarted under the new config; if it
    /// is left without destinations it is stopped instead.
    #[instrument(skip(self, update))]
    pub async fn update_feed(&self, feed: &str, update: FeedUpdate) -> Result<FeedView, RegistryError> {
        let mut active = self.active.lock().await;

        let mut config = self
            .store
            .read(|s| s.feeds.get(feed).cloned())
            .ok_or_else(|| RegistryError::feed_not_found(feed))?;
        if let Some(tags) = update.tags {
            config.tags = tags;
        }
        if let Some(interval_ms) = update.interval_ms {
            config.interval_ms = interval_ms;
        }
        if let Some(batch_size) = update.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(display) = update.display {
            config.display = Some(display);
        }
        let key = validate_feed(&config)?;

        let was_active = active.contains_key(feed);
        let destinations = self.store.update(|s| {
            if let Some(webhooks) = &update.webhooks {
                ensure_webhooks_exist(s, webhooks)?;
                s.feeds_webhooks.retain(|(f, _)| f != feed);
                link_webhooks(s, feed, webhooks);
            }
            if was_active && destinations_of(s, feed).is_empty() {
                config.enabled = false;
            }
            s.feeds.insert(feed.to_string(), config.clone());
            Ok::<_, RegistryError>(destinations_of(s, feed))
        })?;

        if was_active {
            self.deactivate(&mut active, feed);
            if destinations.is_empty() {
                info!("Feed left without destinations, stopped");
            } else {
                self.activate(&mut active, config, key, destinations)?;
                info!("Active feed restarted with new config");
            }
        }

        self.store
            .read(|s| s.feeds.get(feed).map(|c| feed_view(s, &active, c)))
            .ok_or_else(|| RegistryError::feed_not_found(feed))
    }

    /// Stops the feed if active, then deletes it and its webhook links.
    ///
    /// The cursor is kept; other feeds may share the tag key.
    #[instrument(skip(self))]
    pub async fn delete_feed(&self, feed: &str) -> Result<(), RegistryError> {
        let mut active = self.active.lock().await;
        if self.store.read(|s| !s.feeds.contains_key(feed)) {
            return Err(RegistryError::feed_not_found(feed));
        }

        let stopped = self.deactivate(&mut active, feed);
        let result = self.store.update(|s| {
            s.feeds.remove(feed);
            s.feeds_webhooks.retain(|(f, _)| f != feed);
            Ok::<_, RegistryError>(())
        });

        if let Err(e) = result {
            if let Some(previous) = stopped {
                let destinations = previous.dispatcher.destinations().to_vec();
                if let Err(restart) =
                    self.activate(&mut active, previous.config, previous.tag_key, destinations)
                {
                    warn!(error = %restart, "Failed to restart feed after failed delete");
                }
            }
            return Err(e);
        }
        info!("Feed deleted");
        Ok(())
    }

    /// Starts a feed. Returns `Ok(false)` if it was already active.
    #[instrument(skip(self))]
    pub async fn start_feed(&self, feed: &str) -> Result<bool, RegistryError> {
        let mut active = self.active.lock().await;
        if active.contains_key(feed) {
            return Ok(false);
        }

        let (mut config, destinations) = self
            .store
            .read(|s| s.feeds.get(feed).map(|c| (c.clone(), destinations_of(s, feed))))
            .ok_or_else(|| RegistryError::feed_not_found(feed))?;
        if destinations.is_empty() {
            return Err(RegistryError::validation(format!(
                "feed {feed} has no webhook destinations"
            )));
        }
        let key = validate_feed(&config)?;

        if !config.enabled {
            self.set_enabled(feed, true)?;
            config.enabled = true;
        }
        self.activate(&mut active, config, key, destinations)?;
        info!("Feed started");
        Ok(true)
    }

    /// Stops a feed. Returns `Ok(false)` if it was not active.
    #[instrument(skip(self))]
    pub async fn stop_feed(&self, feed: &str) -> Result<bool, RegistryError> {
        let mut active = self.active.lock().await;
        let enabled = self
            .store
            .read(|s| s.feeds.get(feed).map(|c| c.enabled))
            .ok_or_else(|| RegistryError::feed_not_found(feed))?;

        if enabled {
            self.set_enabled(feed, false)?;
        }
        let stopped = self.deactivate(&mut active, feed).is_some();
        if stopped {
            info!("Feed stopped");
        }
        Ok(stopped)
    }

    /// Starts every enabled feed. Failures are logged per feed.
    pub async fn start_all(&self) -> usize {
        let enabled: Vec<String> = self.store.read(|s| {
            s.feeds
                .values()
                .filter(|c| c.enabled)
                .map(|c| c.name.clone())
                .collect()
        });

        let mut started = 0;
        for feed in &enabled {
            match self.start_feed(feed).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!(feed = %feed, error = %e, "Failed to start feed"),
            }
        }
        info!(started, enabled = enabled.len(), "Started enabled feeds");
        started
    }

    /// Stops every active feed without touching `enabled`, then waits for
    /// their queued deliveries to drain.
    pub async fn stop_all(&self) -> usize {
        let stopped: Vec<ActiveFeed> = {
            let mut active = self.active.lock().await;
            let names: Vec<String> = active.keys().cloned().collect();
            names
                .iter()
                .filter_map(|name| self.deactivate(&mut active, name))
                .collect()
        };
        for feed in &stopped {
            feed.dispatcher.shutdown().await;
        }
        info!(stopped = stopped.len(), "Stopped all feeds");
        stopped.len()
    }

    pub async fn is_active(&self, feed: &str) -> bool {
        self.active.lock().await.contains_key(feed)
    }

    // ─── Cursors ───

    pub fn get_last_id(&self, feed: &str) -> Result<u64, RegistryError> {
        let key = self.feed_tag_key(feed)?;
        Ok(self.cursors.get(&key))
    }

    /// Moves the feed's cursor. Affects every feed sharing the tag key.
    #[instrument(skip(self))]
    pub fn set_last_id(&self, feed: &str, last_id: u64) -> Result<(), RegistryError> {
        let key = self.feed_tag_key(feed)?;
        self.cursors.set(&key, last_id)?;
        info!(tag_key = %key, "Cursor set");
        Ok(())
    }

    fn feed_tag_key(&self, feed: &str) -> Result<TagKey, RegistryError> {
        self.store
            .read(|s| s.feeds.get(feed).map(FeedConfig::tag_key))
            .ok_or_else(|| RegistryError::feed_not_found(feed))?
            .ok_or_else(|| RegistryError::validation(format!("feed {feed} has no tags")))
    }

    // ─── Runtime wiring ───

    fn set_enabled(&self, feed: &str, enabled: bool) -> Result<(), RegistryError> {
        self.store.update(|s| {
            let config = s
                .feeds
                .get_mut(feed)
                .ok_or_else(|| RegistryError::feed_not_found(feed))?;
            config.enabled = enabled;
            Ok(())
        })
    }

    fn activate(
        &self,
        active: &mut ActiveSet,
        config: FeedConfig,
        key: TagKey,
        destinations: Vec<WebhookDestination>,
    ) -> Result<(), RegistryError> {
        let (subscription, dispatcher) = self.subscribe_dispatcher(&config, &key, destinations);
        active.insert(
            config.name.clone(),
            ActiveFeed {
                config,
                tag_key: key.clone(),
                subscription,
                dispatcher,
            },
        );
        self.sync_tag(active, &key)
    }

    fn subscribe_dispatcher(
        &self,
        config: &FeedConfig,
        key: &TagKey,
        destinations: Vec<WebhookDestination>,
    ) -> (SubscriptionId, Arc<WebhookDispatcher>) {
        let dispatcher = Arc::new(WebhookDispatcher::spawn(
            config.clone(),
            destinations,
            Arc::clone(&self.sink),
            Arc::clone(&self.dedupe),
            self.dispatch,
        ));
        let handler = Arc::clone(&dispatcher);
        let subscription = self
            .scheduler
            .bus()
            .subscribe(key, move |item| handler.handle_item(item));
        (subscription, dispatcher)
    }

    fn deactivate(&self, active: &mut ActiveSet, feed: &str) -> Option<ActiveFeed> {
        let stopped = active.remove(feed)?;
        self.scheduler
            .bus()
            .unsubscribe(&stopped.tag_key, stopped.subscription);
        stopped.dispatcher.close();
        if let Err(e) = self.sync_tag(active, &stopped.tag_key) {
            warn!(tag_key = %stopped.tag_key, error = %e, "Failed to re-coalesce tag key");
        }
        Some(stopped)
    }

    /// Makes the scheduler entry for `key` match the active feeds using it.
    fn sync_tag(&self, active: &ActiveSet, key: &TagKey) -> Result<(), RegistryError> {
        let merged = PollConfig::merge_all(
            active
                .values()
                .filter(|f| &f.tag_key == key)
                .map(|f| f.config.poll_config()),
        );

        match merged {
            Some(config) => {
                if !self.scheduler.add_tag(key, config) {
                    self.scheduler.reconfigure(key, config)?;
                }
                self.scheduler.start(key)?;
            }
            None => {
                self.scheduler.remove_tag(key);
            }
        }
        Ok(())
    }

    /// Replaces an active feed's dispatcher with one for its current
    /// destinations, or stops the feed if it has none left.
    fn refresh_dispatcher(
        &self,
        active: &mut ActiveSet,
        feed: &str,
    ) -> Result<(), RegistryError> {
        if !active.contains_key(feed) {
            return Ok(());
        }
        let destinations = self.store.read(|s| destinations_of(s, feed));
        if destinations.is_empty() {
            self.set_enabled(feed, false)?;
            self.deactivate(active, feed);
            info!(feed = %feed, "Feed left without destinations, stopped");
            return Ok(());
        }

        // The scheduler entry is untouched; only the fan-out changes.
        if let Some(entry) = active.get_mut(feed) {
            let (subscription, dispatcher) =
                self.subscribe_dispatcher(&entry.config, &entry.tag_key, destinations);
            self.scheduler
                .bus()
                .unsubscribe(&entry.tag_key, entry.subscription);
            entry.dispatcher.close();
            entry.subscription = subscription;
            entry.dispatcher = dispatcher;
        }
        Ok(())
    }
}

// ─── Snapshot helpers ───

fn destinations_of(s: &StoreSnapshot, feed: &str) -> Vec<WebhookDestination> {
    s.webhooks_of(feed)
        .into_iter()
        .filter_map(|name| {
            s.webhooks
                .get(&name)
                .map(|row| WebhookDestination::new(name.clone(), row.url.clone()))
        })
        .collect()
}

fn ensure_webhooks_exist(s: &StoreSnapshot, webhooks: &[String]) -> Result<(), RegistryError> {
    match webhooks.iter().find(|w| !s.webhooks.contains_key(*w)) {
        Some(unknown) => Err(RegistryError::validation(format!(
            "unknown webhook: {unknown}"
        ))),
        None => Ok(()),
    }
}

fn ensure_url_free(s: &StoreSnapshot, url: &str, owner: Option<&str>) -> Result<(), RegistryError> {
    match s.webhook_by_url(url) {
        Some(existing) if Some(existing) != owner => Err(RegistryError::Duplicate {
            kind: "webhook url",
            value: url.to_string(),
        }),
        _ => Ok(()),
    }
}

fn link_webhooks(s: &mut StoreSnapshot, feed: &str, webhooks: &[String]) {
    for webhook in webhooks {
        s.feeds_webhooks.insert((feed.to_string(), webhook.clone()));
    }
}

fn webhook_view(s: &StoreSnapshot, name: &str, row: &WebhookRow) -> WebhookView {
    WebhookView {
        name: name.to_string(),
        url: row.url.clone(),
        feeds: s.feeds_of(name),
    }
}

fn feed_view(s: &StoreSnapshot, active: &ActiveSet, config: &FeedConfig) -> FeedView {
    let running = active.get(&config.name);
    FeedView {
        config: config.clone(),
        tag_key: config.tag_key(),
        webhooks: s.webhooks_of(&config.name),
        active: running.is_some(),
        stats: running.map(|f| f.dispatcher.stats()),
    }
}
