//! Application configuration management.
//!
//! This module handles loading and saving the console configuration, which
//! includes the API base URL, the session endpoints, the expiry marker the
//! server uses, where the access token mirror is kept, and the last used
//! username.
//!
//! Configuration is stored at `~/.config/cmsconsole/config.json`. Values can
//! be overridden from the environment (`CMSCONSOLE_BASE_URL`,
//! `CMSCONSOLE_TOKEN_STORE`, `CMSCONSOLE_TIMEOUT_SECS`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "cmsconsole";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";

/// HTTP request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Machine-readable code the server puts in the error body of a request made
/// with an expired access token.
pub const DEFAULT_EXPIRED_CODE: &str = "TOKEN_EXPIRED";

/// JSON field carrying the machine-readable error code.
pub const DEFAULT_ERROR_CODE_FIELD: &str = "code";

const ENV_BASE_URL: &str = "CMSCONSOLE_BASE_URL";
const ENV_TOKEN_STORE: &str = "CMSCONSOLE_TOKEN_STORE";
const ENV_TIMEOUT_SECS: &str = "CMSCONSOLE_TIMEOUT_SECS";

/// Where the access token mirror lives between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenStoreKind {
    /// JSON file in the cache directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Not persisted
    Memory,
}

impl TokenStoreKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" => Some(Self::File),
            "keyring" | "keychain" => Some(Self::Keyring),
            "memory" | "none" => Some(Self::Memory),
            _ => None,
        }
    }
}

/// Paths of the session endpoints, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub login: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            login: "/auth/login".to_string(),
            refresh: "/auth/refresh".to_string(),
            logout: "/auth/logout".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub endpoints: Endpoints,
    pub expired_code: String,
    pub error_code_field: String,
    pub token_store: TokenStoreKind,
    pub request_timeout_secs: u64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            endpoints: Endpoints::default(),
            expired_code: DEFAULT_EXPIRED_CODE.to_string(),
            error_code_field: DEFAULT_ERROR_CODE_FIELD.to_string(),
            token_store: TokenStoreKind::default(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            last_username: None,
        }
    }
}

impl Config {
    /// Load the config file and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_file()?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load the config file as saved, without environment overrides.
    pub fn load_file() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
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

    /// Apply `CMSCONSOLE_*` overrides using the given lookup.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(kind) = lookup(ENV_TOKEN_STORE) {
            match TokenStoreKind::parse(&kind) {
                Some(kind) => self.token_store = kind,
                None => warn!(value = %kind, "Ignoring unknown token store kind"),
            }
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            match secs.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.request_timeout_secs = secs,
                _ => warn!(value = %secs, "Ignoring invalid request timeout"),
            }
        }
    }

    /// Join an endpoint path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    fn config_path() -> Result<PathBuf> {
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

/// Join a base URL and a path with exactly one slash between them.
/// Absolute URLs are returned unchanged.
pub fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

// ============================================================================
// Tests
// ============================================================================
