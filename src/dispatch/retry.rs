//! Rate-limit aware retry for webhook deliveries.
//!
//! Each (item, destination) gets a fixed budget of attempts (5 by default).
//! A 429 response sleeps for the advertised `retry_after` plus a random jitter
//! drawn uniformly from `[0, attempt × jitter_step]` and then tries again
//! within the same budget. Any other failure abandons the item for that
//! destination immediately, as does a 429 on the final attempt.

use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::render::WebhookPayload;
use super::sink::{DeliveryError, WebhookSink};

/// Configuration for delivery retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryRetryConfig {
    /// Total attempts per item and destination, including the first.
    pub max_attempts: u32,

    /// Jitter grows by this much per attempt.
    pub jitter_step: Duration,

    /// Upper bound applied to advertised `retry_after` values.
    pub max_retry_after: Duration,
}

impl DeliveryRetryConfig {
    /// 5 attempts, jitter up to 250ms per attempt, waits capped at 5 minutes.
    pub const DEFAULT: Self = Self {
        max_attempts: 5,
        jitter_step: Duration::from_millis(250),
        max_retry_after: Duration::from_secs(300),
    };

    /// Same as [`DeliveryRetryConfig::DEFAULT`] with a different attempt budget.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::DEFAULT
        }
    }

    /// Largest jitter that may be added after `attempt` (1-indexed).
    pub fn max_jitter(&self, attempt: u32) -> Duration {
        self.jitter_step.saturating_mul(attempt)
    }

    /// The sleep before retrying a rate-limited `attempt`.
    pub fn rate_limit_delay(&self, retry_after: Duration, attempt: u32, rng: &mut impl Rng) -> Duration {
        let max_jitter_ms = u64::try_from(self.max_jitter(attempt).as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rng.random_range(0..=max_jitter_ms));
        retry_after.min(self.max_retry_after) + jitter
    }
}

impl Default for DeliveryRetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Terminal state of one (item, destination) delivery.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Sent {
        attempts: u32,
    },
    Abandoned {
        attempts: u32,
        last_error: DeliveryError,
    },
}

impl DeliveryOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryOutcome::Sent { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DeliveryOutcome::Sent { attempts } | DeliveryOutcome::Abandoned { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Posts `payload` to `url`, retrying rate limits within the attempt budget.
pub async fn deliver_with_retry(
    sink: &dyn WebhookSink,
    url: &str,
    payload: &WebhookPayload,
    config: &DeliveryRetryConfig,
) -> DeliveryOutcome {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match sink.post(url, payload).await {
            Ok(()) => return DeliveryOutcome::Sent { attempts: attempt },
            Err(e) => e,
        };

        let retry_after = match error.retry_after {
            Some(retry_after) if error.is_rate_limited() && attempt < max_attempts => retry_after,
            _ => {
                return DeliveryOutcome::Abandoned {
                    attempts: attempt,
                    last_error: error,
                };
            }
        };

        let delay = config.rate_limit_delay(retry_after, attempt, &mut rand::rng());
        if attempt + 1 == max_attempts {
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Rate limited; final attempt next");
        } else {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Rate limited; backing off");
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::render::render_item;
    use crate::test_utils::{RecordingSink, item};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    const URL: &str = "https://hooks.example/a";

    #[test]
    fn delay_is_retry_after_plus_bounded_jitter() {
        let config = DeliveryRetryConfig::DEFAULT;
        let mut rng = StdRng::seed_from_u64(7);

        for attempt in 1..=4 {
            let delay = config.rate_limit_delay(Duration::from_secs(2), attempt, &mut rng);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(2) + config.max_jitter(attempt));
        }
    }

    #[test]
    fn retry_after_is_capped() {
        let config = DeliveryRetryConfig {
            jitter_step: Duration::ZERO,
            ..DeliveryRetryConfig::DEFAULT
        };
        let mut rng = StdRng::seed_from_u64(1);

        let delay = config.rate_limit_delay(Duration::from_secs(100_000), 1, &mut rng);

        assert_eq!(delay, config.max_retry_after);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_then_success() {
        let sink = RecordingSink::new();
        sink.script(URL, [Err(DeliveryError::rate_limited(Duration::from_secs(2)))]);
        let payload = render_item(&item(1), None);
        let started = tokio::time::Instant::now();

        let outcome = deliver_with_retry(&sink, URL, &payload, &DeliveryRetryConfig::DEFAULT).await;

        assert!(outcome.is_sent());
        assert_eq!(outcome.attempts(), 2);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() <= Duration::from_secs(2) + Duration::from_millis(250));
        assert_eq!(sink.attempts_to(URL), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_abandons_after_budget() {
        let sink = RecordingSink::new();
        sink.script(
            URL,
            (0..5).map(|_| Err(DeliveryError::rate_limited(Duration::from_secs(1)))),
        );
        let payload = render_item(&item(1), None);

        let outcome = deliver_with_retry(&sink, URL, &payload, &DeliveryRetryConfig::DEFAULT).await;

        match outcome {
            DeliveryOutcome::Abandoned {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 5);
                assert!(last_error.is_rate_limited());
            }
            other => panic!("expected abandonment, got {other:?}"),
        }
        assert_eq!(sink.attempts_to(URL), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn other_errors_abandon_immediately() {
        let sink = RecordingSink::new();
        sink.script(URL, [Err(DeliveryError::status(404, "unknown webhook"))]);
        let payload = render_item(&item(1), None);

        let outcome = deliver_with_retry(&sink, URL, &payload, &DeliveryRetryConfig::DEFAULT).await;

        assert!(!outcome.is_sent());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(sink.attempts_to(URL), 1);
    }

    #[test]
    fn attempt_budget_is_at_least_one() {
        assert_eq!(DeliveryRetryConfig::with_max_attempts(0).max_attempts, 1);
    }
}
