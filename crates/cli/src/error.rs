use connectors::error::ConnectorError;
use engine_config::settings::SettingsError;
use engine_core::error::{CheckpointError, EngineError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read a file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Invalid job definition: {0}")]
    Settings(#[from] SettingsError),

    #[error("Job failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Checkpoint store error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Connection failed: {0}")]
    Connector(#[from] ConnectorError),

    #[error("Failed to serialize data to JSON: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    #[error("Unsupported source dialect: {0}")]
    UnsupportedDialect(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
