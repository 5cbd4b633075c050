//! Persistent CLI profile configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use fleet_core::config::{ConfigError, SyncConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "cli-config.json";
const DEFAULT_SHARE_BASE_URL: &str = "https://fleet.local/";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfilesConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    #[serde(default)]
    pub active_profile: Option<String>,
    #[serde(default)]
    pub profiles: BTreeMap<String, CliProfile>,
}

/// Sync settings for one profile. Unset fields fall back to `FLEET_*`
/// environment variables, then to built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CliProfile {
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub sync_base_url: Option<String>,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
    #[serde(default)]
    pub poll_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub write_policy: Option<String>,
    /// Base URL that share locators are built on
    #[serde(default)]
    pub share_base_url: Option<String>,
}

const fn default_config_version() -> u32 {
    1
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleet")
        .join(CONFIG_FILE_NAME)
}

pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    fleet_core::util::normalize_text_option(value)
}

pub fn normalize_profile_name(value: Option<&str>) -> Option<String> {
    let value = value?.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

impl CliProfilesConfig {
    pub fn load() -> Result<Self, String> {
        Self::load_from_path(&default_config_path())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|error| format!("Failed to read config at {}: {}", path.display(), error))?;
        let mut config = serde_json::from_str::<Self>(&raw)
            .map_err(|error| format!("Failed to parse config at {}: {}", path.display(), error))?;
        config.normalize();
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf, String> {
        let path = default_config_path();
        self.save_to_path(&path)?;
        Ok(path)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|error| {
                format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    error
                )
            })?;
        }

        let mut normalized = self.clone();
        normalized.normalize();
        let serialized = serde_json::to_string_pretty(&normalized)
            .map_err(|error| format!("Failed to serialize config: {error}"))?;
        std::fs::write(path, serialized)
            .map_err(|error| format!("Failed to write config at {}: {}", path.display(), error))
    }

    /// Explicit flag, then `FLEET_PROFILE`, then the active profile, then `default`.
    pub fn resolve_profile_name(&self, explicit: Option<&str>) -> String {
        normalize_profile_name(explicit)
            .or_else(|| normalize_profile_name(std::env::var("FLEET_PROFILE").ok().as_deref()))
            .or_else(|| normalize_profile_name(self.active_profile.as_deref()))
            .unwrap_or_else(|| "default".to_string())
    }

    pub fn profile(&self, name: &str) -> Option<&CliProfile> {
        self.profiles.get(name)
    }

    pub fn profile_mut_or_default(&mut self, name: &str) -> &mut CliProfile {
        self.profiles.entry(name.to_string()).or_default()
    }

    fn normalize(&mut self) {
        self.active_profile = normalize_profile_name(self.active_profile.as_deref());
        for profile in self.profiles.values_mut() {
            profile.normalize();
        }
    }
}

impl CliProfile {
    /// Resolve the effective sync config, reading `FLEET_*` variables for
    /// anything the profile leaves unset.
    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        self.sync_config_with(|name| std::env::var(name).ok())
    }

    pub fn sync_config_with(
        &self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<SyncConfig, ConfigError> {
        SyncConfig::from_lookup(|name| self.setting(name).or_else(|| env(name)))
    }

    pub fn share_base_url(&self) -> String {
        normalize_text_option(self.share_base_url.clone())
            .unwrap_or_else(|| DEFAULT_SHARE_BASE_URL.to_string())
    }

    fn setting(&self, name: &str) -> Option<String> {
        match name {
            "FLEET_SYNC_BACKEND" => self.backend.clone(),
            "FLEET_SYNC_BASE_URL" => self.sync_base_url.clone(),
            "FLEET_SYNC_DEBOUNCE_MS" => self.debounce_ms.map(|value| value.to_string()),
            "FLEET_SYNC_POLL_MS" => self.poll_ms.map(|value| value.to_string()),
            "FLEET_SYNC_TIMEOUT_SECS" => self.timeout_secs.map(|value| value.to_string()),
            "FLEET_WRITE_POLICY" => self.write_policy.clone(),
            _ => None,
        }
    }

    fn normalize(&mut self) {
        self.backend = normalize_text_option(self.backend.take());
        self.sync_base_url = normalize_text_option(self.sync_base_url.take());
        self.write_policy = normalize_text_option(self.write_policy.take());
        self.share_base_url = normalize_text_option(self.share_base_url.take());
    }
}
