use std::path::Path;

use crate::config::schema::ClientConfig;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ClientConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<ClientConfig, ConfigError> {
    let mut config: ClientConfig = serde_json::from_str(content)?;
    config.base_url = config.base_url.trim_end_matches('/').to_string();

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        return Err(ConfigError::Validation {
            message: format!(
                "baseUrl must start with http:// or https://, got '{}'",
                config.base_url
            ),
        });
    }

    for (name, value) in [
        ("statusPollIntervalMs", config.status_poll_interval_ms),
        ("customProgressIntervalMs", config.custom_progress_interval_ms),
        ("requestTimeoutSecs", config.request_timeout_secs),
        ("sharedStore.pollIntervalMs", config.shared_store.poll_interval_ms),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than 0", name),
            });
        }
    }

    if let Some(retry) = &config.retry {
        if retry.initial_delay_ms == 0 || retry.max_delay_ms < retry.initial_delay_ms {
            return Err(ConfigError::Validation {
                message: "retry.maxDelayMs must be >= retry.initialDelayMs > 0".to_string(),
            });
        }
        if !(retry.multiplier.is_finite() && retry.multiplier >= 1.0) {
            return Err(ConfigError::Validation {
                message: format!("retry.multiplier must be >= 1.0, got {}", retry.multiplier),
            });
        }
    }

    Ok(())
}
