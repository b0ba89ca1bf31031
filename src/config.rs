//! Process configuration from `TAGRELAY_*` environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `TAGRELAY_STATE_DIR` | `./state` |
//! | `TAGRELAY_LISTEN_ADDR` | `0.0.0.0:3000` |
//! | `TAGRELAY_UPSTREAM_URL` | `https://danbooru.donmai.us` |
//! | `TAGRELAY_UPSTREAM_LOGIN`, `TAGRELAY_UPSTREAM_API_KEY` | unset |
//! | `TAGRELAY_HTTP_TIMEOUT_SECS` | `30` |
//! | `TAGRELAY_DEDUPE_TTL_HOURS` | `24` |
//! | `TAGRELAY_MAX_ATTEMPTS` | `5` |
//!
//! Credentials are used only when both login and key are set.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::dedupe::DEFAULT_DEDUPE_TTL_HOURS;
use crate::dispatch::DeliveryRetryConfig;
use crate::upstream::UpstreamCredentials;

pub const DEFAULT_STATE_DIR: &str = "./state";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_UPSTREAM_URL: &str = "https://danbooru.donmai.us";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub state_dir: PathBuf,
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    pub credentials: Option<UpstreamCredentials>,
    pub http_timeout: Duration,
    pub dedupe_ttl: chrono::Duration,
    pub max_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            upstream_url: DEFAULT_UPSTREAM_URL.to_string(),
            credentials: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            dedupe_ttl: chrono::Duration::hours(DEFAULT_DEDUPE_TTL_HOURS),
            max_attempts: DeliveryRetryConfig::DEFAULT.max_attempts,
        }
    }
}

impl AppConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads configuration through `lookup`, which maps a variable name to its
    /// value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let lookup = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let state_dir = lookup("TAGRELAY_STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR));
        let listen_addr = parse(&lookup, "TAGRELAY_LISTEN_ADDR", DEFAULT_LISTEN_ADDR)?;
        let upstream_url = lookup("TAGRELAY_UPSTREAM_URL")
            .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string());
        let credentials = match (
            lookup("TAGRELAY_UPSTREAM_LOGIN"),
            lookup("TAGRELAY_UPSTREAM_API_KEY"),
        ) {
            (Some(login), Some(api_key)) => Some(UpstreamCredentials { login, api_key }),
            _ => None,
        };
        let timeout_secs: u64 = parse(&lookup, "TAGRELAY_HTTP_TIMEOUT_SECS", "30")?;
        let ttl_hours: i64 = parse(&lookup, "TAGRELAY_DEDUPE_TTL_HOURS", "24")?;
        let max_attempts: u32 = parse(&lookup, "TAGRELAY_MAX_ATTEMPTS", "5")?;

        if timeout_secs == 0 {
            return Err(invalid("TAGRELAY_HTTP_TIMEOUT_SECS", "0", "must be positive"));
        }
        if ttl_hours <= 0 {
            return Err(invalid(
                "TAGRELAY_DEDUPE_TTL_HOURS",
                &ttl_hours.to_string(),
                "must be positive",
            ));
        }
        if max_attempts == 0 {
            return Err(invalid("TAGRELAY_MAX_ATTEMPTS", "0", "must be at least 1"));
        }

        Ok(AppConfig {
            state_dir,
            listen_addr,
            upstream_url,
            credentials,
            http_timeout: Duration::from_secs(timeout_secs),
            dedupe_ttl: chrono::Duration::hours(ttl_hours),
            max_attempts,
        })
    }

    pub fn retry(&self) -> DeliveryRetryConfig {
        DeliveryRetryConfig::with_max_attempts(self.max_attempts)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: &str,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let value = lookup(var).unwrap_or_else(|| default.to_string());
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, &value, &e.to_string()))
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
