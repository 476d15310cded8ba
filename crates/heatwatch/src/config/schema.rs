use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::secrets::{expand_home, TokenSources};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    pub version: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_env_var: Option<String>,
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
    #[serde(default = "default_custom_progress_interval_ms")]
    pub custom_progress_interval_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub shared_store: SharedStoreConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
}

fn default_status_poll_interval_ms() -> u64 {
    2000
}

fn default_custom_progress_interval_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_dedup_ttl_secs() -> u64 {
    600
}

impl ClientConfig {
    /// Config with every default filled in, pointing at `base_url`.
    pub fn new(base_url: &str) -> Self {
        Self {
            version: "1.0".to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token: None,
            api_token_file: None,
            api_token_env_var: None,
            status_poll_interval_ms: default_status_poll_interval_ms(),
            custom_progress_interval_ms: default_custom_progress_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            probe: ProbeConfig::default(),
            shared_store: SharedStoreConfig::default(),
            retry: None,
            dedup_ttl_secs: default_dedup_ttl_secs(),
        }
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn custom_progress_interval(&self) -> Duration {
        Duration::from_millis(self.custom_progress_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn token_sources(&self) -> TokenSources<'_> {
        TokenSources {
            inline: self.api_token.as_deref(),
            file: self.api_token_file.as_deref(),
            env_var: self.api_token_env_var.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeConfig {
    #[serde(default = "default_probe_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_header_bytes")]
    pub header_bytes: u64,
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_header_bytes() -> u64 {
    256 * 1024
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_probe_timeout_secs(),
            header_bytes: default_header_bytes(),
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedStoreConfig {
    /// Directory shared by every context; `~/.heatwatch/shared` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
    #[serde(default = "default_store_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_store_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_store_poll_interval_ms() -> u64 {
    250
}

fn default_store_debounce_ms() -> u64 {
    100
}

impl Default for SharedStoreConfig {
    fn default() -> Self {
        Self {
            directory: None,
            poll_interval_ms: default_store_poll_interval_ms(),
            debounce_ms: default_store_debounce_ms(),
        }
    }
}

impl SharedStoreConfig {
    /// Resolves the store directory, expanding `~`.
    pub fn resolve_directory(&self) -> Option<PathBuf> {
        match self.directory.as_deref() {
            Some(dir) if !dir.trim().is_empty() => Some(expand_home(dir)),
            _ => dirs::home_dir().map(|h| h.join(".heatwatch").join("shared")),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Bounded exponential backoff for transient status poll failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_initial_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}
