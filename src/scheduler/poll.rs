//! Polling configuration per tag key.
//!
//! Several feeds can share one tag key. They share a single poll task, which
//! runs at the fastest interval any of them asks for and fetches the largest
//! batch any of them asks for.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lower bound applied to every effective interval (1 second).
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Effective polling parameters for one tag key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    /// Time between the start of consecutive polls.
    pub interval: Duration,

    /// Maximum number of items requested per poll.
    pub batch_size: u32,
}

impl PollConfig {
    /// Creates a config, clamping the interval to [`MIN_POLL_INTERVAL`] and the
    /// batch size to at least 1.
    pub fn new(interval: Duration, batch_size: u32) -> Self {
        PollConfig {
            interval: interval.max(MIN_POLL_INTERVAL),
            batch_size: batch_size.max(1),
        }
    }

    /// Combines two registrants' configs: fastest interval, largest batch.
    pub fn merge(self, other: PollConfig) -> PollConfig {
        PollConfig {
            interval: self.interval.min(other.interval),
            batch_size: self.batch_size.max(other.batch_size),
        }
    }

    /// Merges every config in `configs`. Returns `None` if there are none.
    pub fn merge_all(configs: impl IntoIterator<Item = PollConfig>) -> Option<PollConfig> {
        configs.into_iter().reduce(PollConfig::merge)
    }
}
