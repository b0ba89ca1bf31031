//! Field validation for registry writes.

use reqwest::Url;

use super::error::RegistryError;
use crate::scheduler::MIN_POLL_INTERVAL;
use crate::types::{FeedConfig, TagKey};

pub const MAX_NAME_CHARS: usize = 64;
pub const MAX_BATCH_SIZE: u32 = 200;

/// Names are path segments in the admin API.
pub fn validate_name(kind: &str, name: &str) -> Result<(), RegistryError> {
    if name.trim().is_empty() {
        return Err(RegistryError::validation(format!("{kind} name must not be empty")));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(RegistryError::validation(format!(
            "{kind} name must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    if name.contains('/') {
        return Err(RegistryError::validation(format!(
            "{kind} name must not contain '/'"
        )));
    }
    Ok(())
}

/// Accepts absolute http(s) URLs with a host.
pub fn validate_url(field: &str, url: &str) -> Result<(), RegistryError> {
    let parsed = Url::parse(url)
        .map_err(|e| RegistryError::validation(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(RegistryError::validation(format!(
            "{field} must be an http or https URL"
        )));
    }
    Ok(())
}

/// Checks every feed field and returns the feed's canonical tag key.
pub fn validate_feed(config: &FeedConfig) -> Result<TagKey, RegistryError> {
    validate_name("feed", &config.name)?;

    let key = config
        .tag_key()
        .ok_or_else(|| RegistryError::validation("feed must have at least one tag"))?;

    if config.interval() < MIN_POLL_INTERVAL {
        return Err(RegistryError::validation(format!(
            "interval_ms must be at least {}",
            MIN_POLL_INTERVAL.as_millis()
        )));
    }
    if !(1..=MAX_BATCH_SIZE).contains(&config.batch_size) {
        return Err(RegistryError::validation(format!(
            "batch_size must be between 1 and {MAX_BATCH_SIZE}"
        )));
    }
    if let Some(avatar) = config.display.as_ref().and_then(|d| d.avatar_url.as_deref()) {
        validate_url("avatar_url", avatar)?;
    }
    Ok(key)
}
