//! On-disk layout of the durable store.
//!
//! The whole store is one JSON document holding four tables:
//!
//! ```text
//! webhooks        name -> url
//! feeds           name -> tags, interval_ms, batch_size, display, enabled
//! feeds_webhooks  (feed, webhook) pairs
//! cursors         tag_key -> last_id
//! ```
//!
//! Writes go through [`save_snapshot_atomic`], so a crash leaves either the
//! previous or the new document on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::fsync::write_atomic;
use crate::types::FeedConfig;

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur while reading or writing the store document.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("schema version mismatch: expected {expected}, got {got}")]
    SchemaMismatch { expected: u32, got: u32 },
}

/// A row of the `webhooks` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRow {
    pub url: String,
}

/// The full contents of the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub schema_version: u32,

    /// When the document was last written.
    pub written_at: DateTime<Utc>,

    #[serde(default)]
    pub webhooks: BTreeMap<String, WebhookRow>,

    #[serde(default)]
    pub feeds: BTreeMap<String, FeedConfig>,

    /// Join between feeds and the webhooks they reference, as `(feed, webhook)`.
    #[serde(default)]
    pub feeds_webhooks: BTreeSet<(String, String)>,

    /// Last-seen item id per canonical tag key.
    #[serde(default)]
    pub cursors: BTreeMap<String, u64>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreSnapshot {
    /// Creates an empty store document.
    pub fn new() -> Self {
        StoreSnapshot {
            schema_version: SCHEMA_VERSION,
            written_at: Utc::now(),
            webhooks: BTreeMap::new(),
            feeds: BTreeMap::new(),
            feeds_webhooks: BTreeSet::new(),
            cursors: BTreeMap::new(),
        }
    }

    /// Names of the webhooks joined to `feed`, in name order.
    pub fn webhooks_of(&self, feed: &str) -> Vec<String> {
        self.feeds_webhooks
            .iter()
            .filter(|(f, _)| f == feed)
            .map(|(_, w)| w.clone())
            .collect()
    }

    /// Names of the feeds joined to `webhook`, in name order.
    pub fn feeds_of(&self, webhook: &str) -> Vec<String> {
        self.feeds_webhooks
            .iter()
            .filter(|(_, w)| w == webhook)
            .map(|(f, _)| f.clone())
            .collect()
    }

    /// Finds the webhook name that owns `url`, if any.
    pub fn webhook_by_url(&self, url: &str) -> Option<&str> {
        self.webhooks
            .iter()
            .find(|(_, row)| row.url == url)
            .map(|(name, _)| name.as_str())
    }
}

/// Writes the store document atomically.
pub fn save_snapshot_atomic(path: &Path, snapshot: &StoreSnapshot) -> Result<(), SnapshotError> {
    let bytes = serde_json::to_vec_pretty(snapshot)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// Loads the store document, checking its schema version.
pub fn load_snapshot(path: &Path) -> Result<StoreSnapshot, SnapshotError> {
    let bytes = std::fs::read(path)?;
    let snapshot: StoreSnapshot = serde_json::from_slice(&bytes)?;

    if snapshot.schema_version != SCHEMA_VERSION {
        return Err(SnapshotError::SchemaMismatch {
            expected: SCHEMA_VERSION,
            got: snapshot.schema_version,
        });
    }
    Ok(snapshot)
}

/// Loads the store document, returning `None` if it doesn't exist yet.
pub fn try_load_snapshot(path: &Path) -> Result<Option<StoreSnapshot>, SnapshotError> {
    match load_snapshot(path) {
        Ok(snapshot) => Ok(Some(snapshot)),
        Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> StoreSnapshot {
        let mut snapshot = StoreSnapshot::new();
        snapshot.webhooks.insert(
            "main".into(),
            WebhookRow {
                url: "https://hooks.example/1".into(),
            },
        );
        snapshot.feeds.insert(
            "cats".into(),
            FeedConfig {
                name: "cats".into(),
                tags: vec!["cat".into()],
                interval_ms: 60_000,
                batch_size: 20,
                display: None,
                enabled: true,
            },
        );
        snapshot
            .feeds_webhooks
            .insert(("cats".into(), "main".into()));
        snapshot.cursors.insert("cat".into(), 41);
        snapshot
    }

    #[test]
    fn save_then_load_preserves_tables() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let snapshot = sample();

        save_snapshot_atomic(&path, &snapshot).unwrap();
        let loaded = load_snapshot(&path).unwrap();

        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert!(
            try_load_snapshot(&dir.path().join("absent.json"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        let mut snapshot = sample();
        snapshot.schema_version = SCHEMA_VERSION + 1;
        save_snapshot_atomic(&path, &snapshot).unwrap();

        assert!(matches!(
            load_snapshot(&path),
            Err(SnapshotError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn malformed_json_is_an_error_not_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            try_load_snapshot(&path),
            Err(SnapshotError::Json(_))
        ));
    }

    #[test]
    fn join_lookups() {
        let snapshot = sample();
        assert_eq!(snapshot.webhooks_of("cats"), vec!["main".to_string()]);
        assert_eq!(snapshot.feeds_of("main"), vec!["cats".to_string()]);
        assert_eq!(
            snapshot.webhook_by_url("https://hooks.example/1"),
            Some("main")
        );
        assert!(snapshot.webhook_by_url("https://elsewhere").is_none());
    }
}
