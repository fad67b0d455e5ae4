use thiserror::Error;

/// Errors raised while loading or validating job configuration.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// One or more settings are invalid; every problem found is listed.
    #[error("Invalid settings: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    /// Two settings cannot be combined.
    #[error("Conflicting settings: {0}")]
    Conflict(String),

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: String, value: String },

    #[error("Failed to read job file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse job file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing connection string for {0}")]
    MissingUrl(String),
}
