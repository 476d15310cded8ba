use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Heatwatch(#[from] heatwatch::HeatwatchError),

    #[error("No configuration: pass --config <path> or --base-url <url>")]
    NoConfig,

    #[error("Job {0} is not a completed job")]
    NotCompleted(String),

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl From<heatwatch::ConfigError> for CliError {
    fn from(e: heatwatch::ConfigError) -> Self {
        CliError::Heatwatch(e.into())
    }
}

impl From<heatwatch::ApiError> for CliError {
    fn from(e: heatwatch::ApiError) -> Self {
        CliError::Heatwatch(e.into())
    }
}

impl From<heatwatch::StoreError> for CliError {
    fn from(e: heatwatch::StoreError) -> Self {
        CliError::Heatwatch(e.into())
    }
}

impl From<heatwatch::SecretError> for CliError {
    fn from(e: heatwatch::SecretError) -> Self {
        CliError::Heatwatch(e.into())
    }
}
