//! Feed and webhook configuration records.
//!
//! These are the durable rows owned by the registry. A feed references its
//! webhooks by name; the join lives in the store, not in the feed itself.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ids::TagKey;
use crate::scheduler::PollConfig;

/// Default poll interval for new feeds (60 seconds).
pub const DEFAULT_FEED_INTERVAL_MS: u64 = 60_000;

/// Default upstream batch size for new feeds.
pub const DEFAULT_FEED_BATCH_SIZE: u32 = 20;

/// A named HTTP endpoint that receives rendered notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDestination {
    /// Unique name used by feeds to reference this webhook.
    pub name: String,
    /// Unique destination URL.
    pub url: String,
}

impl WebhookDestination {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        WebhookDestination {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Optional identity shown on delivered notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayIdentity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// A persisted feed definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Unique feed name.
    pub name: String,

    /// Tags as entered by the administrator. See [`FeedConfig::tag_key`].
    pub tags: Vec<String>,

    /// Requested poll interval in milliseconds.
    pub interval_ms: u64,

    /// Maximum number of items fetched per poll.
    pub batch_size: u32,

    /// Username/avatar override for delivered notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<DisplayIdentity>,

    /// Whether the feed was last started (true) or stopped (false).
    ///
    /// Rehydration on startup only starts enabled feeds.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl FeedConfig {
    /// Returns the canonical tag key, or `None` if the tag set is empty.
    pub fn tag_key(&self) -> Option<TagKey> {
        TagKey::from_tags(&self.tags)
    }

    /// Returns the requested poll interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Returns the polling configuration this feed asks for.
    pub fn poll_config(&self) -> PollConfig {
        PollConfig::new(self.interval(), self.batch_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(tags: &[&str]) -> FeedConfig {
        FeedConfig {
            name: "cats".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            interval_ms: 30_000,
            batch_size: 10,
            display: None,
            enabled: true,
        }
    }

    #[test]
    fn tag_key_is_canonical() {
        let key = feed(&["Cat_Ears", "solo"]).tag_key().unwrap();
        assert_eq!(key.as_str(), "cat_ears solo");
    }

    #[test]
    fn poll_config_carries_interval_and_batch() {
        let config = feed(&["solo"]).poll_config();
        assert_eq!(config.interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 10);
    }

    #[test]
    fn enabled_defaults_to_true_when_absent() {
        let json = r#"{"name":"a","tags":["x"],"interval_ms":1000,"batch_size":5}"#;
        let feed: FeedConfig = serde_json::from_str(json).unwrap();
        assert!(feed.enabled);
        assert!(feed.display.is_none());
    }
}
