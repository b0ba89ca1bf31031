//! Registry errors.

use thiserror::Error;

use crate::persistence::StoreError;
use crate::scheduler::SchedulerError;

/// Failure of a registry operation. No variant leaves a partial durable write.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A field failed validation, a referenced webhook is unknown, or a feed
    /// cannot start for lack of destinations.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A name or URL is already taken. Also a validation failure.
    #[error("{kind} already exists: {value}")]
    Duplicate { kind: &'static str, value: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

impl RegistryError {
    pub fn validation(message: impl Into<String>) -> Self {
        RegistryError::Validation(message.into())
    }

    pub fn feed_not_found(name: &str) -> Self {
        RegistryError::NotFound {
            kind: "feed",
            name: name.to_string(),
        }
    }

    pub fn webhook_not_found(name: &str) -> Self {
        RegistryError::NotFound {
            kind: "webhook",
            name: name.to_string(),
        }
    }

    /// True for the caller-error variants ([`Validation`](Self::Validation)
    /// and [`Duplicate`](Self::Duplicate)).
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RegistryError::Validation(_) | RegistryError::Duplicate { .. }
        )
    }
}
