//! Per-tag-key polling.
//!
//! The scheduler owns one entry per registered tag key. A started entry has a
//! timer task that polls immediately and then once per effective interval.
//! Every poll:
//!
//! 1. reads the key's cursor,
//! 2. fetches up to `batch_size` items with id above the cursor,
//! 3. discards anything at or below the cursor and sorts the rest ascending,
//! 4. publishes each item on the bus under the key,
//! 5. persists the highest id seen as the new cursor.
//!
//! Cursor advancement depends only on what was fetched, never on delivery.
//!
//! # Run state
//!
//! Each key is `Idle` or `Running`. A timer tick or manual [`TagScheduler::poll`]
//! that finds the key `Running` is skipped, so polls for one key never overlap
//! and never queue up behind a slow upstream.
//!
//! # Stopping
//!
//! Stopping cancels the timer. A poll already in flight is not aborted; it
//! completes (and may publish and advance the cursor) after `stop` returns.
//! Removing a key while its poll is in flight keeps the run state around, so
//! re-adding and starting the key does not overlap the old poll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::poll::PollConfig;
use crate::bus::EventBus;
use crate::persistence::{CursorStore, StoreError};
use crate::types::{Item, TagKey};
use crate::upstream::{FetchRequest, ItemSource, UpstreamError};

/// The bus items are published on.
pub type ItemBus = EventBus<Arc<Item>>;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("tag key is not registered: {0}")]
    UnknownTag(TagKey),

    #[error("poll for {tag_key} failed: {source}")]
    Poll {
        tag_key: TagKey,
        #[source]
        source: PollError,
    },
}

/// Why a single poll failed. The cursor is never advanced past a failure.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("failed to persist cursor: {0}")]
    Cursor(#[from] StoreError),
}

/// Whether a poll for a key is currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
}

/// What one completed poll did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub cursor_before: u64,
    pub cursor_after: u64,
    /// Items returned by the upstream that parsed.
    pub fetched: usize,
    /// Items published on the bus.
    pub published: usize,
    /// Items dropped for being at or below the cursor, or repeated.
    pub discarded: usize,
    /// Subscriber invocations that failed across all published items.
    pub handler_failures: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(PollReport),
    /// Another poll for the same key was already running.
    Skipped,
}

// ─── Shared state ───

struct PollContext {
    source: Arc<dyn ItemSource>,
    cursors: CursorStore,
    bus: Arc<ItemBus>,
}

/// State shared between an entry, its timer task and its poll tasks.
struct TagShared {
    key: TagKey,
    config: Mutex<PollConfig>,
    in_flight: AtomicBool,
    /// Wakes the timer to recompute its deadline after a config change.
    reconfigured: Notify,
}

impl TagShared {
    fn config(&self) -> PollConfig {
        *self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_config(&self, config: PollConfig) -> bool {
        let mut current = self.config.lock().unwrap_or_else(PoisonError::into_inner);
        let changed = *current != config;
        *current = config;
        drop(current);
        if changed {
            self.reconfigured.notify_one();
        }
        changed
    }

    fn run_state(&self) -> RunState {
        if self.in_flight.load(Ordering::Acquire) {
            RunState::Running
        } else {
            RunState::Idle
        }
    }

    /// Moves the key from `Idle` to `Running`, or returns `None` if it is
    /// already running.
    fn try_begin(self: &Arc<Self>) -> Option<RunGuard> {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard(Arc::clone(self)))
    }
}

/// Returns the key to `Idle` when dropped, including on panic.
struct RunGuard(Arc<TagShared>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

struct Timer {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct TagEntry {
    shared: Arc<TagShared>,
    timer: Option<Timer>,
}

impl TagEntry {
    fn is_running(&self) -> bool {
        self.timer.as_ref().is_some_and(|t| !t.task.is_finished())
    }

    fn stop_timer(&mut self) -> bool {
        match self.timer.take() {
            Some(timer) => {
                timer.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

// ─── Scheduler ───

/// Polls registered tag keys and publishes new items on the bus.
pub struct TagScheduler {
    ctx: Arc<PollContext>,
    entries: Mutex<HashMap<TagKey, TagEntry>>,
    /// Run state of removed keys whose last poll was still in flight.
    retired: Mutex<HashMap<TagKey, Weak<TagShared>>>,
}

impl std::fmt::Debug for TagScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagScheduler")
            .field("registered", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl TagScheduler {
    pub fn new(source: Arc<dyn ItemSource>, cursors: CursorStore, bus: Arc<ItemBus>) -> Self {
        TagScheduler {
            ctx: Arc::new(PollContext {
                source,
                cursors,
                bus,
            }),
            entries: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &Arc<ItemBus> {
        &self.ctx.bus
    }

    /// Registers `key`, or merges `config` into its existing config.
    ///
    /// Returns `true` if the key was newly registered.
    pub fn add_tag(&self, key: &TagKey, config: PollConfig) -> bool {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) => {
                let merged = entry.shared.config().merge(config);
                if entry.shared.set_config(merged) {
                    debug!(tag_key = %key, interval_ms = merged.interval.as_millis() as u64, batch_size = merged.batch_size, "Merged poll config");
                }
                false
            }
            None => {
                let shared = match self.take_retired(key) {
                    Some(shared) => {
                        shared.set_config(config);
                        debug!(tag_key = %key, "Re-registered tag key with a poll in flight");
                        shared
                    }
                    None => Arc::new(TagShared {
                        key: key.clone(),
                        config: Mutex::new(config),
                        in_flight: AtomicBool::new(false),
                        reconfigured: Notify::new(),
                    }),
                };
                entries.insert(
                    key.clone(),
                    TagEntry {
                        shared,
                        timer: None,
                    },
                );
                debug!(tag_key = %key, "Registered tag key");
                true
            }
        }
    }

    /// Replaces the config of a registered key. A running timer adopts the
    /// new interval from its last tick.
    pub fn reconfigure(&self, key: &TagKey, config: PollConfig) -> Result<(), SchedulerError> {
        let entries = self.lock();
        let entry = entries
            .get(key)
            .ok_or_else(|| SchedulerError::UnknownTag(key.clone()))?;
        if entry.shared.set_config(config) {
            debug!(tag_key = %key, interval_ms = config.interval.as_millis() as u64, batch_size = config.batch_size, "Reconfigured poll config");
        }
        Ok(())
    }

    /// Stops and deregisters `key`. Returns `false` if it was not registered.
    pub fn remove_tag(&self, key: &TagKey) -> bool {
        match self.lock().remove(key) {
            Some(mut entry) => {
                entry.stop_timer();
                if entry.shared.run_state() == RunState::Running {
                    let mut retired = self.lock_retired();
                    retired.retain(|_, shared| shared.strong_count() > 0);
                    retired.insert(key.clone(), Arc::downgrade(&entry.shared));
                }
                debug!(tag_key = %key, "Deregistered tag key");
                true
            }
            None => false,
        }
    }

    /// Starts the timer for `key`: one poll now, then one per interval.
    ///
    /// Returns `Ok(false)` if it was already running.
    pub fn start(&self, key: &TagKey) -> Result<bool, SchedulerError> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(key)
            .ok_or_else(|| SchedulerError::UnknownTag(key.clone()))?;
        if entry.is_running() {
            return Ok(false);
        }

        let cancel = CancellationToken::new();
        let span = info_span!("tag_poll", tag_key = %key);
        let task = tokio::spawn(
            run_timer(
                Arc::clone(&self.ctx),
                Arc::clone(&entry.shared),
                cancel.clone(),
            )
            .instrument(span),
        );
        entry.timer = Some(Timer { cancel, task });
        Ok(true)
    }

    /// Cancels the timer for `key`. Returns `false` if it was not running or
    /// is not registered.
    pub fn stop(&self, key: &TagKey) -> bool {
        let mut entries = self.lock();
        let stopped = entries.get_mut(key).is_some_and(TagEntry::stop_timer);
        if stopped {
            debug!(tag_key = %key, "Stopped tag key");
        }
        stopped
    }

    /// Stops every running key. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let mut entries = self.lock();
        entries
            .values_mut()
            .map(TagEntry::stop_timer)
            .filter(|stopped| *stopped)
            .count()
    }

    /// Polls `key` once on the caller's task.
    pub async fn poll(&self, key: &TagKey) -> Result<PollOutcome, SchedulerError> {
        let shared = self
            .lock()
            .get(key)
            .map(|e| Arc::clone(&e.shared))
            .ok_or_else(|| SchedulerError::UnknownTag(key.clone()))?;

        let Some(_guard) = shared.try_begin() else {
            debug!(tag_key = %key, "Poll already in flight, skipping");
            return Ok(PollOutcome::Skipped);
        };

        self.ctx
            .poll_once(&shared)
            .await
            .map(PollOutcome::Completed)
            .map_err(|source| SchedulerError::Poll {
                tag_key: key.clone(),
                source,
            })
    }

    pub fn is_registered(&self, key: &TagKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn is_running(&self, key: &TagKey) -> bool {
        self.lock().get(key).is_some_and(TagEntry::is_running)
    }

    /// Whether a poll for `key` is in flight. `None` if not registered.
    pub fn run_state(&self, key: &TagKey) -> Option<RunState> {
        self.lock().get(key).map(|e| e.shared.run_state())
    }

    pub fn effective_config(&self, key: &TagKey) -> Option<PollConfig> {
        self.lock().get(key).map(|e| e.shared.config())
    }

    /// Keys with a running timer, sorted.
    pub fn active_tags(&self) -> Vec<TagKey> {
        let mut keys: Vec<TagKey> = self
            .lock()
            .iter()
            .filter(|(_, e)| e.is_running())
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Registered keys, sorted.
    pub fn registered_tags(&self) -> Vec<TagKey> {
        let mut keys: Vec<TagKey> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TagKey, TagEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_retired(&self) -> MutexGuard<'_, HashMap<TagKey, Weak<TagShared>>> {
        self.retired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes back the run state of a removed key if its poll is still in flight.
    fn take_retired(&self, key: &TagKey) -> Option<Arc<TagShared>> {
        self.lock_retired()
            .remove(key)?
            .upgrade()
            .filter(|shared| shared.run_state() == RunState::Running)
    }
}

impl Drop for TagScheduler {
    fn drop(&mut self) {
        self.stop_all();
    }
}

impl PollContext {
    async fn poll_once(&self, shared: &TagShared) -> Result<PollReport, PollError> {
        let key = &shared.key;
        let config = shared.config();
        let cursor = self.cursors.get(key);

        let request = FetchRequest {
            tag_key: key.clone(),
            after: cursor,
            limit: config.batch_size,
        };
        let batch = self.source.fetch(&request).await?;
        let fetched = batch.items.len();

        let mut fresh: Vec<Item> = batch
            .items
            .into_iter()
            .filter(|item| item.id.0 > cursor)
            .collect();
        fresh.sort_by_key(|item| item.id);
        fresh.dedup_by_key(|item| item.id);
        let discarded = fetched - fresh.len();
        if discarded > 0 {
            debug!(tag_key = %key, cursor, discarded, "Discarded items at or below cursor");
        }

        let mut report = PollReport {
            cursor_before: cursor,
            cursor_after: cursor,
            fetched,
            discarded,
            ..PollReport::default()
        };
        let mut highest = cursor;
        for item in fresh {
            highest = highest.max(item.id.0);
            let published = self.bus.publish(key, &Arc::new(item));
            report.published += 1;
            report.handler_failures += published.failed;
        }

        // Re-read: an administrator may have moved the cursor during the fetch.
        let stored = self.cursors.get(key);
        if highest > stored {
            self.cursors.set(key, highest)?;
            report.cursor_after = highest;
        } else {
            report.cursor_after = stored;
        }
        Ok(report)
    }

    /// Runs a guarded poll on its own task, or skips if one is in flight.
    fn spawn_poll(self: &Arc<Self>, shared: &Arc<TagShared>) {
        let Some(guard) = shared.try_begin() else {
            debug!(tag_key = %shared.key, "Previous poll still in flight, skipping tick");
            return;
        };
        let ctx = Arc::clone(self);
        tokio::spawn(
            async move {
                let shared = Arc::clone(&guard.0);
                match ctx.poll_once(&shared).await {
                    Ok(report) if report.published > 0 => info!(
                        tag_key = %shared.key,
                        published = report.published,
                        cursor = report.cursor_after,
                        "Published new items"
                    ),
                    Ok(report) => debug!(tag_key = %shared.key, fetched = report.fetched, "No new items"),
                    Err(e) => warn!(tag_key = %shared.key, error = %e, "Poll failed; waiting for next interval"),
                }
                drop(guard);
            }
            .in_current_span(),
        );
    }
}

async fn run_timer(ctx: Arc<PollContext>, shared: Arc<TagShared>, cancel: CancellationToken) {
    info!(interval_ms = shared.config().interval.as_millis() as u64, "Poll timer started");
    loop {
        let fired_at = Instant::now();
        ctx.spawn_poll(&shared);

        loop {
            let deadline = fired_at + shared.config().interval;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Poll timer stopped");
                    return;
                }
                _ = shared.reconfigured.notified() => continue,
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
    }
}
