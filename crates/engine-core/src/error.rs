use connectors::error::{ConnectorError, DbError};
use planner::error::PlanError;
use std::time::Duration;
use thiserror::Error;

/// Failures reading from the record source.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source connection failed: {0}")]
    Connect(#[from] ConnectorError),

    #[error("Source query failed: {0}")]
    Db(#[from] DbError),
}

/// Failures writing to the target.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Target connection failed: {0}")]
    Connect(#[from] ConnectorError),

    #[error("Target write failed: {0}")]
    Db(#[from] DbError),
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Failed to open pooled connection: {0}")]
    Connect(#[from] ConnectorError),

    #[error("Connection pool is closed")]
    Closed,

    #[error("Connection pool holds {size} connections but {required} workers need one each")]
    Undersized { size: usize, required: usize },
}

#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Checkpoint encoding error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Checkpoint store error: {0}")]
    Other(String),
}

#[derive(Error, Debug)]
pub enum RunLogError {
    #[error("Run log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Job-level failure taxonomy. Only configuration and checkpoint errors abort
/// a run; the others describe why a chunk failed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Extract error: {0}")]
    Extract(#[from] SourceError),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Load error: {0}")]
    Load(#[from] SinkError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Connection pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Run log error: {0}")]
    RunLog(#[from] RunLogError),

    #[error("Chunk exceeded its deadline of {0:?}")]
    Timeout(Duration),

    #[error("Run cancelled")]
    Cancelled,
}

impl From<PlanError> for EngineError {
    fn from(err: PlanError) -> Self {
        EngineError::Configuration(err.to_string())
    }
}

impl EngineError {
    /// Short category name used in row-error and chunk-error records.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "CONFIGURATION",
            EngineError::Extract(_) => "EXTRACT",
            EngineError::Transform(_) => "TRANSFORM",
            EngineError::Load(_) => "LOAD",
            EngineError::Checkpoint(_) => "CHECKPOINT",
            EngineError::Pool(_) => "POOL",
            EngineError::RunLog(_) => "RUN_LOG",
            EngineError::Timeout(_) => "TIMEOUT",
            EngineError::Cancelled => "CANCELLED",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::Configuration(_) | EngineError::Checkpoint(_)
        )
    }
}
