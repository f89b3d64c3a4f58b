//! Application configuration management.
//!
//! This module handles loading and saving the client configuration: the API
//! endpoint, request timeouts, and which credential backend to use.
//!
//! Configuration is stored at `~/.config/raved/config.json`. Environment
//! variables override the file.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/data directory paths
const APP_NAME: &str = "raved";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Default backend origin; auth paths already carry the `/api` prefix.
const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Seconds before a token's `exp` at which it is already treated as expired.
const DEFAULT_TOKEN_EXPIRY_LEEWAY_SECS: i64 = 30;

/// Which credential backend holds the token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// Passphrase-encrypted files in the data directory
    Vault,
    /// In-process only; nothing survives a restart
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "keyring" => Ok(StorageBackend::Keyring),
            "vault" | "file" => Ok(StorageBackend::Vault),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(anyhow::anyhow!("Unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub max_rate_limit_retries: u32,
    pub storage: StorageBackend,
    pub keyring_service: String,
    pub token_expiry_leeway_secs: i64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
            storage: StorageBackend::default(),
            keyring_service: APP_NAME.to_string(),
            token_expiry_leeway_secs: DEFAULT_TOKEN_EXPIRY_LEEWAY_SECS,
            last_username: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
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

    /// Apply `RAVED_*` overrides. Malformed numeric values are ignored with a warning.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("RAVED_API_URL").filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url;
        }
        if let Some(raw) = var("RAVED_REQUEST_TIMEOUT_SECS") {
            match raw.trim().parse() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring invalid RAVED_REQUEST_TIMEOUT_SECS"),
            }
        }
        if let Some(raw) = var("RAVED_STORAGE") {
            match raw.parse() {
                Ok(backend) => self.storage = backend,
                Err(e) => warn!(error = %e, "Ignoring invalid RAVED_STORAGE"),
            }
        }
        if let Some(service) = var("RAVED_KEYRING_SERVICE").filter(|v| !v.trim().is_empty()) {
            self.keyring_service = service;
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Directory for the credential vault and the profile snapshot.
    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    pub fn token_expiry_leeway(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_expiry_leeway_secs.max(0))
    }
}
