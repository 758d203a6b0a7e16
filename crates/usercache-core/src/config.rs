//! Application configuration management.
//!
//! Configuration is stored at `~/.config/usercache/config.json`. The API
//! endpoint and offline mode can be overridden from the environment
//! (`USERCACHE_API_ENDPOINT`, `USERCACHE_OFFLINE`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "usercache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default REST endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://jsonplaceholder.typicode.com";

/// Environment variable overriding `api_base_url`
pub const ENV_API_ENDPOINT: &str = "USERCACHE_API_ENDPOINT";

/// Environment variable forcing offline mode ("1" or "true")
pub const ENV_OFFLINE: &str = "USERCACHE_OFFLINE";

// ============================================================================
// Defaults
// ============================================================================

/// Data younger than this is served without a new request
const DEFAULT_STALE_AFTER_SECS: u64 = 2;

/// Unobserved entries are evicted after this long (24 hours)
const DEFAULT_EXPIRE_AFTER_SECS: u64 = 24 * 60 * 60;

/// Minimum gap between snapshot writes
const DEFAULT_PERSIST_THROTTLE_MS: u64 = 1000;

/// How often the connectivity monitor probes the API
const DEFAULT_CONNECTIVITY_PROBE_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub stale_after_secs: u64,
    pub expire_after_secs: u64,
    pub persist_throttle_ms: u64,
    pub connectivity_probe_secs: u64,
    /// Never touch the network; serve the cache only.
    pub offline_mode: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            expire_after_secs: DEFAULT_EXPIRE_AFTER_SECS,
            persist_throttle_ms: DEFAULT_PERSIST_THROTTLE_MS,
            connectivity_probe_secs: DEFAULT_CONNECTIVITY_PROBE_SECS,
            offline_mode: false,
        }
    }
}

impl Config {
    /// Load from disk (or defaults), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from `lookup` (the process environment in `load`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = lookup(ENV_API_ENDPOINT) {
            let endpoint = endpoint.trim();
            if !endpoint.is_empty() {
                self.api_base_url = endpoint.to_string();
            }
        }
        if let Some(offline) = lookup(ENV_OFFLINE) {
            self.offline_mode = matches!(offline.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}
