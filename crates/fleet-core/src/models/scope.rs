//! Sync scope (tenant identifier) model

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

const MAX_SCOPE_LEN: usize = 128;

/// Identifier selecting which remote snapshot a client reads and writes.
///
/// Clients sharing a scope observe the same remote document; clients with
/// different scopes are isolated. Users exchange this value out of band.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncScope(String);

impl SyncScope {
    /// Parse and validate a scope identifier.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput("sync scope must not be empty".to_string()));
        }
        if trimmed.len() > MAX_SCOPE_LEN {
            return Err(Error::InvalidInput(format!(
                "sync scope must be at most {MAX_SCOPE_LEN} characters"
            )));
        }
        if !scope_pattern().is_match(trimmed) {
            return Err(Error::InvalidInput(
                "sync scope may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn scope_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid scope regex"))
}

impl fmt::Display for SyncScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SyncScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SyncScope {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SyncScope> for String {
    fn from(value: SyncScope) -> Self {
        value.0
    }
}
