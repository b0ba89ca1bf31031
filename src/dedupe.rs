//! Time-windowed "claim once" gate.
//!
//! The dispatcher claims `"<feed>:<item id>"` before rendering an item. If the
//! same feed sees the same item again within the TTL (default 24 hours), for
//! instance because it was stopped and restarted over an overlapping id range
//! or its cursor was rewound by an administrator, the repeat claim fails and
//! the item is not delivered twice.
//!
//! # Expiry
//!
//! An entry expires `ttl` after the claim that created it; repeat claims do not
//! extend it. Expired entries are replaced lazily on the next claim and
//! removed in bulk by a background sweep (every 60 seconds by default), so
//! memory stays bounded even when no further claims arrive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default TTL for claims (24 hours).
pub const DEFAULT_DEDUPE_TTL_HOURS: i64 = 24;

/// Default interval between background sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A set of claimed keys with expiry timestamps.
#[derive(Debug)]
pub struct DedupeCache {
    ttl: chrono::Duration,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Default for DedupeCache {
    fn default() -> Self {
        Self::new(chrono::Duration::hours(DEFAULT_DEDUPE_TTL_HOURS))
    }
}

impl DedupeCache {
    pub fn new(ttl: chrono::Duration) -> Self {
        DedupeCache {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the claim TTL.
    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Claims `key` now. See [`DedupeCache::try_claim_at`].
    pub fn try_claim(&self, key: &str) -> bool {
        self.try_claim_at(key, Utc::now())
    }

    /// Claims `key` as of `now`.
    ///
    /// Returns `true` if the key was unclaimed or its claim had expired, and
    /// `false` if an unexpired claim exists.
    pub fn try_claim_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        match entries.get(key) {
            Some(expires_at) if *expires_at > now => false,
            _ => {
                entries.insert(key.to_string(), now + self.ttl);
                true
            }
        }
    }

    /// Removes entries that have expired as of `now`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    /// Removes entries that have expired by now.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    /// Number of tracked claims, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the periodic sweep. The task exits when `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately; nothing can have expired yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.sweep_expired();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "Swept expired dedupe claims");
                        }
                    }
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
