//! Webhook delivery sink.
//!
//! [`WebhookSink`] is the seam between the dispatcher and the network. The
//! production [`HttpWebhookSink`] posts JSON with reqwest and classifies the
//! response into "sent", "rate limited" or "failed".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use thiserror::Error;

use super::render::WebhookPayload;

/// Retry delay assumed when a 429 carries no usable hint.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Classification of a delivery error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryErrorKind {
    /// HTTP 429. Retried after the advertised delay.
    RateLimited,

    /// Anything else. The item is abandoned for this destination.
    Failed,
}

/// A failed delivery attempt.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct DeliveryError {
    pub kind: DeliveryErrorKind,
    pub message: String,
    /// How long the destination asked us to wait. Set for rate limits only.
    pub retry_after: Option<Duration>,
    /// HTTP status, if a response was received.
    pub status: Option<u16>,
}

impl DeliveryError {
    pub fn rate_limited(retry_after: Duration) -> Self {
        DeliveryError {
            kind: DeliveryErrorKind::RateLimited,
            message: format!("rate limited, retry after {:.3}s", retry_after.as_secs_f64()),
            retry_after: Some(retry_after),
            status: Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        DeliveryError {
            kind: DeliveryErrorKind::Failed,
            message: message.into(),
            retry_after: None,
            status: None,
        }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        DeliveryError {
            kind: DeliveryErrorKind::Failed,
            message: format!("webhook returned HTTP {status}: {}", message.into()),
            retry_after: None,
            status: Some(status),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.kind == DeliveryErrorKind::RateLimited
    }
}

/// Something that accepts rendered payloads for a destination URL.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError>;
}

/// Posts payloads over HTTP.
#[derive(Debug, Clone)]
pub struct HttpWebhookSink {
    client: reqwest::Client,
}

impl HttpWebhookSink {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(format!("tagrelay/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(HttpWebhookSink { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpWebhookSink { client }
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    async fn post(&self, url: &str, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|e| DeliveryError::failed(format!("webhook request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let header_hint = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after_header);
        let body = response.text().await.unwrap_or_default();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = parse_retry_after_body(&body)
                .or(header_hint)
                .unwrap_or(DEFAULT_RETRY_AFTER);
            return Err(DeliveryError::rate_limited(retry_after));
        }

        Err(DeliveryError::status(
            status.as_u16(),
            body.chars().take(200).collect::<String>(),
        ))
    }
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

/// Reads `retry_after` (seconds, possibly fractional) from a JSON 429 body.
fn parse_retry_after_body(body: &str) -> Option<Duration> {
    let parsed: RateLimitBody = serde_json::from_str(body).ok()?;
    seconds(parsed.retry_after)
}

/// Reads a `Retry-After` header given in seconds.
fn parse_retry_after_header(value: &str) -> Option<Duration> {
    seconds(value.trim().parse().ok()?)
}

fn seconds(value: f64) -> Option<Duration> {
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value))
}
