use model::chunk::config::ChunkStrategy;
use thiserror::Error;

/// Raised before any chunk runs when the job cannot be chunked as asked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Key column '{column}' is not in the source query's projected columns")]
    KeyNotProjected { column: String },

    #[error("Key-based chunking requires a key column")]
    MissingKeyColumn,

    #[error("{strategy} chunking is not supported by {dialect}")]
    UnsupportedStrategy {
        strategy: ChunkStrategy,
        dialect: String,
    },

    #[error("Chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("Chunk {index} is outside the plan ({num_chunks} chunks)")]
    ChunkOutOfRange { index: usize, num_chunks: usize },
}
