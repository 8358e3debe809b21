//! Sync configuration
//!
//! Loaded from `WAYMARK_*` environment variables. Every value has a default
//! so a client with no backend configured still runs in local-only mode.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::ops::RangeInclusive;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connectivity::ConnectivityConfig;
use crate::models::{DEFAULT_INVITE_MAX_USES, DEFAULT_INVITE_TTL_SECS};
use crate::outbox::MAX_RETRIES;
use crate::util::{is_http_url, is_ws_url, normalize_text_option};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// REST base URL; `None` means local-only
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    /// WebSocket change feed base URL
    pub feed_url: Option<String>,
    pub max_retries: u32,
    pub online_poll_secs: u64,
    pub offline_poll_secs: u64,
    /// Periodic pull cadence; 0 disables the pull loop
    pub pull_interval_secs: u64,
    pub invite_ttl_secs: u64,
    pub invite_max_uses: u32,
    pub request_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            api_base_url: None,
            api_token: None,
            feed_url: None,
            max_retries: MAX_RETRIES,
            online_poll_secs: 15,
            offline_poll_secs: 30,
            pull_interval_secs: 0,
            invite_ttl_secs: DEFAULT_INVITE_TTL_SECS,
            invite_max_uses: DEFAULT_INVITE_MAX_USES,
            request_timeout_secs: 30,
        }
    }
}

impl fmt::Debug for SyncSettings {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SyncSettings")
            .field("api_base_url", &self.api_base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("feed_url", &self.feed_url)
            .field("max_retries", &self.max_retries)
            .field("online_poll_secs", &self.online_poll_secs)
            .field("offline_poll_secs", &self.offline_poll_secs)
            .field("pull_interval_secs", &self.pull_interval_secs)
            .field("invite_ttl_secs", &self.invite_ttl_secs)
            .field("invite_max_uses", &self.invite_max_uses)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base_url = optional_url(&lookup, "WAYMARK_API_URL", is_http_url, "http:// or https://")?;
        let api_token = optional_trimmed(&lookup, "WAYMARK_API_TOKEN");
        let feed_url = optional_url(&lookup, "WAYMARK_FEED_URL", is_ws_url, "ws:// or wss://")?;

        let max_retries = parse_in_range(
            &lookup,
            "WAYMARK_MAX_RETRIES",
            u64::from(defaults.max_retries),
            1..=100,
        )?;
        let online_poll_secs = parse_in_range(
            &lookup,
            "WAYMARK_ONLINE_POLL_SECS",
            defaults.online_poll_secs,
            1..=3_600,
        )?;
        let offline_poll_secs = parse_in_range(
            &lookup,
            "WAYMARK_OFFLINE_POLL_SECS",
            defaults.offline_poll_secs,
            1..=3_600,
        )?;
        let pull_interval_secs = parse_in_range(
            &lookup,
            "WAYMARK_PULL_INTERVAL_SECS",
            defaults.pull_interval_secs,
            0..=86_400,
        )?;
        let invite_ttl_secs = parse_in_range(
            &lookup,
            "WAYMARK_INVITE_TTL_SECS",
            defaults.invite_ttl_secs,
            60..=90 * 86_400,
        )?;
        let invite_max_uses = parse_in_range(
            &lookup,
            "WAYMARK_INVITE_MAX_USES",
            u64::from(defaults.invite_max_uses),
            1..=1_000,
        )?;
        let request_timeout_secs = parse_in_range(
            &lookup,
            "WAYMARK_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout_secs,
            1..=300,
        )?;

        Ok(Self {
            api_base_url,
            api_token,
            feed_url,
            max_retries: narrow(max_retries),
            online_poll_secs,
            offline_poll_secs,
            pull_interval_secs,
            invite_ttl_secs,
            invite_max_uses: narrow(invite_max_uses),
            request_timeout_secs,
        })
    }

    /// Whether a backend is configured at all.
    pub const fn is_remote_configured(&self) -> bool {
        self.api_base_url.is_some()
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub const fn pull_interval(&self) -> Option<Duration> {
        if self.pull_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.pull_interval_secs))
        }
    }

    pub fn invite_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.invite_ttl_secs).unwrap_or(i64::MAX))
    }

    pub const fn connectivity(&self) -> ConnectivityConfig {
        ConnectivityConfig {
            online_poll_interval: Duration::from_secs(self.online_poll_secs),
            offline_poll_interval: Duration::from_secs(self.offline_poll_secs),
        }
    }
}

fn optional_url(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    valid_scheme: fn(&str) -> bool,
    schemes: &str,
) -> Result<Option<String>, ConfigError> {
    let Some(url) = optional_trimmed(lookup, name) else {
        return Ok(None);
    };
    if !valid_scheme(&url) {
        return Err(ConfigError::Invalid(format!(
            "{name} must start with {schemes}"
        )));
    }
    Ok(Some(url.trim_end_matches('/').to_string()))
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: RangeInclusive<u64>,
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(value)
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

fn narrow(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
