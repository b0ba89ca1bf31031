//! Upstream fetch errors.
//!
//! None of these are retried in place. The scheduler logs them and waits for
//! the next tick, leaving the cursor untouched.

use thiserror::Error;

/// Failure to obtain a batch from the upstream item source.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("upstream request failed: {0}")]
    Network(#[source] reqwest::Error),

    /// The upstream answered with a non-success status.
    #[error("upstream returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body was not a JSON array of records.
    #[error("upstream response is not a JSON array: {0}")]
    Body(String),

    /// Used by tests and alternative sources that aren't HTTP-backed.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),
}

impl UpstreamError {
    /// The HTTP status code, if the failure carried one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            UpstreamError::Status { status, .. } => Some(*status),
            UpstreamError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => UpstreamError::Status {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => UpstreamError::Network(err),
        }
    }
}
