//! Logging setup for binaries embedding the library.
//!
//! Library code logs through `log` and opens `tracing` spans; this installs a
//! `tracing-subscriber` registry and bridges `log` records into it so span
//! context shows up on every line.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Environment variable consulted when no explicit filter is given.
pub const LOG_ENV_VAR: &str = "HEATWATCH_LOG";

const DEFAULT_FILTER: &str = "info";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {message}")]
    InvalidFilter { filter: String, message: String },

    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

fn build_env_filter(filter: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let directives = match filter {
        Some(f) => f.to_string(),
        None => std::env::var(LOG_ENV_VAR).unwrap_or_else(|_| DEFAULT_FILTER.to_string()),
    };
    // Keep HTTP internals quiet unless asked for explicitly.
    let full = format!("{},hyper=warn,hyper_util=warn,reqwest=warn", directives);
    EnvFilter::try_new(&full).map_err(|e| LoggingError::InvalidFilter {
        filter: directives,
        message: e.to_string(),
    })
}

/// Installs the global subscriber.
///
/// `filter` overrides `HEATWATCH_LOG`; `json` switches to JSON lines. A second
/// call returns [`LoggingError::AlreadyInitialized`].
pub fn init_logging(filter: Option<&str>, json: bool) -> Result<(), LoggingError> {
    let env_filter = build_env_filter(filter)?;

    // ok(): another bridge may already be installed
    tracing_log::LogTracer::init().ok();

    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_invalid_filter_rejected() {
        let err = build_env_filter(Some("heatwatch=loud")).unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFilter { .. }));
    }

    #[test]
    #[serial]
    fn test_filter_from_env() {
        std::env::set_var(LOG_ENV_VAR, "heatwatch=debug");
        assert!(build_env_filter(None).is_ok());
        std::env::remove_var(LOG_ENV_VAR);
    }

    #[test]
    #[serial]
    fn test_second_init_is_an_error_not_a_panic() {
        let first = init_logging(Some("warn"), false);
        let second = init_logging(Some("warn"), true);
        // Another test binary may have installed a subscriber first.
        assert!(first.is_err() || second.is_err());
    }
}
