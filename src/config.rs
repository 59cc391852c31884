//! Sidecar configuration.
//!
//! Resolution order: `--config <path>`, then `EDUFACED_CONFIG`, then
//! `<config_dir>/edufaced/config.toml`, then compiled defaults. Secrets may
//! also come from the environment, which wins over the file.

use crate::attendance::ScannerConfig;
use crate::billing::BillingConfig;
use crate::matcher::MatcherConfig;
use crate::provider::{ProviderSettings, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "EDUFACED_CONFIG";
pub const DEFAULT_LOG_FILTER: &str = "edufaced=info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub remote_url: Option<String>,
    pub remote_api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Local,
            remote_url: None,
            remote_api_key: None,
            timeout_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl ProviderConfig {
    pub fn settings(&self) -> ProviderSettings {
        ProviderSettings {
            api_key: self.api_key.clone(),
            endpoint: self.endpoint.clone(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_filter: Option<String>,
    pub workspace: Option<PathBuf>,
    pub store: StoreConfig,
    pub provider: ProviderConfig,
    pub matcher: MatcherConfig,
    pub scanner: ScannerConfig,
    pub billing: BillingConfig,
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

/// First existing config file in priority order. Explicit paths are returned
/// even when missing so that loading reports them.
pub fn resolve_config_path(cli: Option<&Path>, env_value: Option<String>) -> Option<PathBuf> {
    if let Some(p) = cli {
        return Some(p.to_path_buf());
    }
    if let Some(p) = non_blank(env_value) {
        return Some(PathBuf::from(p));
    }
    dirs::config_dir()
        .map(|d| d.join("edufaced").join("config.toml"))
        .filter(|p| p.exists())
}

impl Config {
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Resolves, reads, applies process environment overrides and validates.
    pub fn load(cli: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match resolve_config_path(cli, std::env::var(CONFIG_ENV).ok()) {
            Some(path) => Self::from_file(&path)?,
            None => Config::default(),
        };
        cfg.apply_env(|k| std::env::var(k).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = non_blank(lookup("EDUFACED_API_KEY")).or_else(|| non_blank(lookup("GEMINI_API_KEY"))) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = non_blank(lookup("EDUFACED_REMOTE_URL")) {
            self.store.remote_url = Some(url);
        }
        if let Some(key) = non_blank(lookup("EDUFACED_REMOTE_API_KEY")) {
            self.store.remote_api_key = Some(key);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matcher.window == 0 {
            return Err(ConfigError::Invalid("matcher.window must be at least 1".into()));
        }
        if self.scanner.max_dimension == 0 {
            return Err(ConfigError::Invalid("scanner.max_dimension must be at least 1".into()));
        }
        if !(1..=100).contains(&self.scanner.jpeg_quality) {
            return Err(ConfigError::Invalid("scanner.jpeg_quality must be within 1..=100".into()));
        }
        if self.scanner.recent_limit == 0 {
            return Err(ConfigError::Invalid("scanner.recent_limit must be at least 1".into()));
        }
        if let Some(c) = self.matcher.min_confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(ConfigError::Invalid("matcher.min_confidence must be within 0..=1".into()));
            }
        }
        if self.store.backend == StoreBackend::Remote && !self.is_remote_store_configured() {
            return Err(ConfigError::Invalid(
                "store.backend = \"remote\" requires store.remote_url".into(),
            ));
        }
        if self.billing.receipt_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("billing.receipt_prefix must not be empty".into()));
        }
        Ok(())
    }

    pub fn is_remote_store_configured(&self) -> bool {
        self.store
            .remote_url
            .as_deref()
            .map(|u| !u.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn is_provider_configured(&self) -> bool {
        self.provider
            .api_key
            .as_deref()
            .map(|k| !k.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }
}
