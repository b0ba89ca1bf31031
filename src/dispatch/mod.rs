//! Delivery of published items to webhook destinations.
//!
//! - [`render`]: item → chat-webhook payload
//! - [`sink`]: the [`WebhookSink`] seam and its reqwest implementation
//! - [`retry`]: the per-destination attempt budget and rate-limit backoff
//! - [`dispatcher`]: one [`WebhookDispatcher`] per active feed

pub mod dispatcher;
pub mod render;
pub mod retry;
pub mod sink;

pub use dispatcher::{DEFAULT_QUEUE_CAPACITY, DispatchStats, DispatcherConfig, WebhookDispatcher};
pub use render::{FileKind, MAX_FIELD_CHARS, WebhookPayload, render_item};
pub use retry::{DeliveryOutcome, DeliveryRetryConfig, deliver_with_retry};
pub use sink::{DeliveryError, DeliveryErrorKind, HttpWebhookSink, WebhookSink};
