use std::path::PathBuf;
use thiserror::Error;

pub use crate::api::ApiError;
pub use crate::secrets::SecretError;

#[derive(Error, Debug)]
pub enum HeatwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Backend error: {0}")]
    Api(#[from] ApiError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Shared store error: {0}")]
    Store(#[from] StoreError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to resolve API token: {0}")]
    Token(#[from] SecretError),
}

/// A request rejected locally, before anything is sent to the backend.
///
/// The display text is the warning shown to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Please select a job first.")]
    NoJobSelected,

    #[error("Please enter both start and end time.")]
    MissingWindow,

    #[error("Start and end time must be non-negative.")]
    NegativeTime,

    #[error("Start time must be before end time.")]
    InvertedWindow,

    #[error("End time cannot exceed video duration.")]
    ExceedsDuration { end_time: f64, duration: f64 },

    #[error("Please generate or select a heatmap first")]
    NothingToExport,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write key '{key}': {source}")]
    WriteKey {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read key '{key}': {source}")]
    ReadKey {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid store key '{0}'")]
    InvalidKey(String),

    #[error("Failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    WatchError(String),
}

pub type Result<T> = std::result::Result<T, HeatwatchError>;
