use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

const MIN_JWT_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub database_path: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub auth_clock_skew: Duration,
    pub rate_limit_window: Duration,
    pub fleet_read_rate_limit_per_window: u32,
    pub fleet_write_rate_limit_per_window: u32,
    pub max_payload_bytes: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("database_path", &self.database_path)
            .field("jwt_secret", &"[REDACTED]")
            .field("jwt_issuer", &self.jwt_issuer)
            .field("auth_clock_skew", &self.auth_clock_skew)
            .field("rate_limit_window", &self.rate_limit_window)
            .field(
                "fleet_read_rate_limit_per_window",
                &self.fleet_read_rate_limit_per_window,
            )
            .field(
                "fleet_write_rate_limit_per_window",
                &self.fleet_write_rate_limit_per_window,
            )
            .field("max_payload_bytes", &self.max_payload_bytes)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "FLEET_API_BIND_ADDR", "127.0.0.1:8080");
        let database_path = value_or_default(&lookup, "FLEET_API_DATABASE_PATH", "fleet-api.db");

        let jwt_secret = required_trimmed(&lookup, "FLEET_API_JWT_SECRET")?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "FLEET_API_JWT_SECRET must be at least {MIN_JWT_SECRET_LEN} characters"
            )));
        }
        let jwt_issuer = optional_trimmed(&lookup, "FLEET_API_JWT_ISSUER");

        let auth_clock_skew_secs: u64 =
            parse_bounded(&lookup, "AUTH_CLOCK_SKEW_SECS", 60, 0, 300)?;
        let rate_limit_window_secs: u64 =
            parse_bounded(&lookup, "RATE_LIMIT_WINDOW_SECS", 60, 10, 3_600)?;
        let fleet_read_rate_limit_per_window =
            parse_bounded(&lookup, "FLEET_READ_RATE_LIMIT_PER_WINDOW", 240, 1, 10_000)?;
        let fleet_write_rate_limit_per_window =
            parse_bounded(&lookup, "FLEET_WRITE_RATE_LIMIT_PER_WINDOW", 120, 1, 5_000)?;
        let max_payload_bytes = parse_bounded(
            &lookup,
            "FLEET_API_MAX_PAYLOAD_BYTES",
            5 * 1024 * 1024,
            1024,
            50 * 1024 * 1024,
        )?;

        Ok(Self {
            bind_addr,
            database_path,
            jwt_secret,
            jwt_issuer,
            auth_clock_skew: Duration::from_secs(auth_clock_skew_secs),
            rate_limit_window: Duration::from_secs(rate_limit_window_secs),
            fleet_read_rate_limit_per_window,
            fleet_write_rate_limit_per_window,
            max_payload_bytes,
        })
    }
}

fn parse_bounded<T>(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: T,
    min: T,
    max: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + fmt::Display + Copy,
{
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(default);
    };
    let value = raw.parse::<T>().map_err(|_| {
        ConfigError::Invalid(format!("{name} must be an integer in [{min}, {max}]"))
    })?;
    if value < min || value > max {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    fleet_core::util::normalize_text_option(lookup(name))
}
