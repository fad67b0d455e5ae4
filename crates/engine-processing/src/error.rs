use crate::transform::TransformError;
use connectors::error::DbError;
use engine_core::error::{EngineError, PoolError, SinkError, SourceError};
use std::time::Duration;
use thiserror::Error;

/// Why a chunk rolled back.
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Extract failed after {attempts} attempt(s): {source}")]
    Extract {
        attempts: usize,
        #[source]
        source: SourceError,
    },

    #[error("Row {row_index} failed to transform: {source}")]
    Transform {
        row_index: usize,
        #[source]
        source: TransformError,
    },

    #[error("Row {row_index} was rejected by the target ({code}): {message}")]
    Rejected {
        row_index: usize,
        code: String,
        message: String,
    },

    #[error("Load failed: {0}")]
    Load(#[from] SinkError),

    #[error("Chunk exceeded its deadline of {0:?}")]
    Deadline(Duration),

    #[error("No connection available: {0}")]
    Pool(#[from] PoolError),
}

impl ChunkError {
    pub fn category(&self) -> &'static str {
        match self {
            ChunkError::Extract { .. } => "EXTRACT",
            ChunkError::Transform { .. } => "TRANSFORM",
            ChunkError::Rejected { .. } | ChunkError::Load(_) => "LOAD",
            ChunkError::Deadline(_) => "TIMEOUT",
            ChunkError::Pool(_) => "POOL",
        }
    }
}

impl From<ChunkError> for EngineError {
    fn from(err: ChunkError) -> Self {
        match err {
            ChunkError::Extract { source, .. } => EngineError::Extract(source),
            ChunkError::Load(source) => EngineError::Load(source),
            ChunkError::Deadline(limit) => EngineError::Timeout(limit),
            ChunkError::Pool(source) => EngineError::Pool(source),
            other @ ChunkError::Transform { .. } => EngineError::Transform(other.to_string()),
            other @ ChunkError::Rejected { .. } => {
                EngineError::Load(SinkError::Db(DbError::Write(other.to_string())))
            }
        }
    }
}
