//! tagrelay - relays new tagged posts from an image board to chat webhooks.
//!
//! Feeds name a tag set and a list of webhooks. Feeds with the same canonical
//! tag set share one poller and one cursor; each new item is rendered once and
//! delivered to every destination of every subscribed feed.

pub mod bus;
pub mod config;
pub mod dedupe;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod text;
pub mod types;
pub mod upstream;

#[cfg(test)]
pub(crate) mod test_utils;
