//! Sync configuration shared by every client.
//!
//! Values come from an env-style lookup (`FLEET_SYNC_*`) or are assembled by a
//! client from its own profile file. Nothing here is hardcoded into the sync
//! engine.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::access::WritePolicy;
use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_DEBOUNCE_MS: u64 = 2_000;
pub const DEFAULT_POLL_MS: u64 = 8_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

const DEBOUNCE_RANGE_MS: (u64, u64) = (250, 60_000);
const POLL_RANGE_MS: (u64, u64) = (1_000, 3_600_000);
const TIMEOUT_RANGE_SECS: (u64, u64) = (1, 120);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which remote backend implementation to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Anonymous JSON blob store
    #[default]
    Blob,
    /// Authenticated per-tenant API (`fleet-api`)
    Tenant,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tenant => "tenant",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blob" => Ok(Self::Blob),
            "tenant" | "api" => Ok(Self::Tenant),
            other => Err(ConfigError::Invalid(format!(
                "unknown sync backend '{other}' (expected blob or tenant)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub backend: BackendKind,
    /// Remote base URL; `None` keeps the client local-only.
    pub base_url: Option<String>,
    /// Quiet period after the last mutation before a push
    pub debounce: Duration,
    pub poll_interval: Duration,
    /// Upper bound for every HTTP call
    pub request_timeout: Duration,
    pub write_policy: WritePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            base_url: None,
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            write_policy: WritePolicy::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = std::env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match optional_trimmed(&lookup, "FLEET_SYNC_BACKEND") {
            Some(value) => value.parse()?,
            None => BackendKind::default(),
        };

        let base_url = optional_trimmed(&lookup, "FLEET_SYNC_BASE_URL")
            .map(|value| normalize_base_url(&value))
            .transpose()?;

        let debounce_ms = parse_in_range(
            &lookup,
            "FLEET_SYNC_DEBOUNCE_MS",
            DEFAULT_DEBOUNCE_MS,
            DEBOUNCE_RANGE_MS,
        )?;
        let poll_ms = parse_in_range(&lookup, "FLEET_SYNC_POLL_MS", DEFAULT_POLL_MS, POLL_RANGE_MS)?;
        let timeout_secs = parse_in_range(
            &lookup,
            "FLEET_SYNC_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
            TIMEOUT_RANGE_SECS,
        )?;

        let write_policy = match optional_trimmed(&lookup, "FLEET_WRITE_POLICY") {
            Some(value) => value
                .parse()
                .map_err(|error: crate::Error| ConfigError::Invalid(error.to_string()))?,
            None => WritePolicy::default(),
        };

        Ok(Self {
            backend,
            base_url,
            debounce: Duration::from_millis(debounce_ms),
            poll_interval: Duration::from_millis(poll_ms),
            request_timeout: Duration::from_secs(timeout_secs),
            write_policy,
        })
    }

    /// Re-check a config assembled by hand (e.g. from a CLI profile).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(base_url) = self.base_url.as_deref() {
            normalize_base_url(base_url)?;
        }
        check_range(
            "debounce",
            duration_millis(self.debounce),
            DEBOUNCE_RANGE_MS,
        )?;
        check_range(
            "poll interval",
            duration_millis(self.poll_interval),
            POLL_RANGE_MS,
        )?;
        check_range(
            "request timeout",
            self.request_timeout.as_secs(),
            TIMEOUT_RANGE_SECS,
        )?;
        Ok(())
    }

    pub const fn is_remote_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

/// Trim, require http(s), and drop trailing slashes.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let value = normalize_text_option(Some(raw.to_string()))
        .ok_or(ConfigError::Missing("FLEET_SYNC_BASE_URL"))?;
    if is_http_url(&value) {
        Ok(value.trim_end_matches('/').to_string())
    } else {
        Err(ConfigError::Invalid(
            "sync base URL must start with http:// or https://".to_string(),
        ))
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: u64,
    range: (u64, u64),
) -> Result<u64, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.0, range.1
        ))
    })?;
    check_range(name, value, range)?;
    Ok(value)
}

fn check_range(name: &str, value: u64, (min, max): (u64, u64)) -> Result<(), ConfigError> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )))
    }
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_map(pairs: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SyncConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = from_map(&[]).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.debounce, Duration::from_millis(2_000));
        assert_eq!(config.poll_interval, Duration::from_millis(8_000));
        assert!(!config.is_remote_configured());
    }

    #[test]
    fn parses_full_environment() {
        let config = from_map(&[
            ("FLEET_SYNC_BACKEND", "tenant"),
            ("FLEET_SYNC_BASE_URL", "https://api.example.com/v1/"),
            ("FLEET_SYNC_DEBOUNCE_MS", "1500"),
            ("FLEET_SYNC_POLL_MS", "5000"),
            ("FLEET_SYNC_TIMEOUT_SECS", "4"),
            ("FLEET_WRITE_POLICY", "admin-only"),
        ])
        .unwrap();

        assert_eq!(config.backend, BackendKind::Tenant);
        assert_eq!(config.base_url.as_deref(), Some("https://api.example.com/v1"));
        assert_eq!(config.debounce, Duration::from_millis(1_500));
        assert_eq!(config.poll_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(4));
        assert_eq!(config.write_policy, WritePolicy::AdminOnly);
    }

    #[test]
    fn rejects_out_of_range_timers() {
        let error = from_map(&[("FLEET_SYNC_DEBOUNCE_MS", "10")]).unwrap_err();
        assert!(error.to_string().contains("FLEET_SYNC_DEBOUNCE_MS"));

        let error = from_map(&[("FLEET_SYNC_POLL_MS", "soon")]).unwrap_err();
        assert!(error.to_string().contains("FLEET_SYNC_POLL_MS"));
    }

    #[test]
    fn rejects_bad_backend_and_url() {
        assert!(from_map(&[("FLEET_SYNC_BACKEND", "ftp")]).is_err());
        assert!(from_map(&[("FLEET_SYNC_BASE_URL", "example.com")]).is_err());
    }

    #[test]
    fn validate_checks_hand_built_config() {
        let config = SyncConfig {
            poll_interval: Duration::from_millis(10),
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(SyncConfig::default().validate().is_ok());
    }
}
