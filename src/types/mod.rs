//! Core domain types for tagrelay.
//!
//! Identifiers, feed/webhook configuration rows, and parsed upstream items.

pub mod feed;
pub mod ids;
pub mod item;

pub use feed::{
    DEFAULT_FEED_BATCH_SIZE, DEFAULT_FEED_INTERVAL_MS, DisplayIdentity, FeedConfig,
    WebhookDestination,
};
pub use ids::{ItemId, TAG_KEY_SEPARATOR, TagKey};
pub use item::{DisplayView, Item, ItemFields, ItemFlags, Rating};
