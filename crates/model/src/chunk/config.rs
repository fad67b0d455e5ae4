use crate::{chunk::task::ChunkBound, core::value::Value};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_CHUNK_SIZE: u64 = 50_000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStrategy {
    /// Page through the wrapped query with the dialect's OFFSET / LIMIT.
    OffsetLimit,

    /// Disjoint ranges over an ordered key column.
    KeyBased,

    /// Position ranges computed with ROW_NUMBER() or a native pseudo-column.
    RowidBased,
}

impl ChunkStrategy {
    pub fn is_positional(&self) -> bool {
        !matches!(self, ChunkStrategy::KeyBased)
    }
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkStrategy::OffsetLimit => "OFFSET_LIMIT",
            ChunkStrategy::KeyBased => "KEY_BASED",
            ChunkStrategy::RowidBased => "ROWID_BASED",
        };
        write!(f, "{name}")
    }
}

/// Where a run starts reading relative to the full source.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub enum ResumePoint {
    #[default]
    Start,

    /// Rows with a key strictly greater than the value remain.
    AfterKey(Value),

    /// The first N rows of the ordered source are already loaded.
    AfterRows(u64),
}

/// The chunking plan for one run. Built once by the planner, then shared
/// read-only with every worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkConfig {
    pub strategy: ChunkStrategy,
    pub chunk_size: u64,
    pub num_chunks: usize,
    pub key_column: Option<String>,
    pub estimated_total_rows: Option<u64>,
    pub parallel_allowed: bool,
    pub resume: ResumePoint,
    /// Inclusive upper key of every chunk but the last.
    pub key_boundaries: Vec<Value>,
}

impl ChunkConfig {
    /// `ceil(rows / chunk_size)`, never less than one.
    pub fn chunk_count_for(rows: u64, chunk_size: u64) -> usize {
        if chunk_size == 0 {
            return 1;
        }
        (rows.div_ceil(chunk_size) as usize).max(1)
    }

    /// A plan that reads everything remaining in one chunk.
    pub fn single(strategy: ChunkStrategy, chunk_size: u64, resume: ResumePoint) -> Self {
        ChunkConfig {
            strategy,
            chunk_size,
            num_chunks: 1,
            key_column: None,
            estimated_total_rows: None,
            parallel_allowed: false,
            resume,
            key_boundaries: Vec::new(),
        }
    }

    pub fn is_last(&self, chunk_index: usize) -> bool {
        chunk_index + 1 >= self.num_chunks
    }

    /// Rows already loaded by earlier runs under a row-skip checkpoint.
    pub fn row_offset(&self) -> u64 {
        match self.resume {
            ResumePoint::AfterRows(rows) => rows,
            _ => 0,
        }
    }

    /// Bounds of a chunk. Key bounds are exclusive below and inclusive
    /// above; row bounds count rows of the ordered source the same way.
    pub fn bounds(&self, chunk_index: usize) -> (ChunkBound, ChunkBound) {
        match self.strategy {
            ChunkStrategy::KeyBased => {
                let lower = if chunk_index == 0 {
                    match &self.resume {
                        ResumePoint::AfterKey(value) => ChunkBound::Key(value.clone()),
                        _ => ChunkBound::Unbounded,
                    }
                } else {
                    self.key_boundaries
                        .get(chunk_index - 1)
                        .cloned()
                        .map(ChunkBound::Key)
                        .unwrap_or(ChunkBound::Unbounded)
                };
                let upper = if self.is_last(chunk_index) {
                    ChunkBound::Unbounded
                } else {
                    self.key_boundaries
                        .get(chunk_index)
                        .cloned()
                        .map(ChunkBound::Key)
                        .unwrap_or(ChunkBound::Unbounded)
                };
                (lower, upper)
            }
            ChunkStrategy::OffsetLimit | ChunkStrategy::RowidBased => {
                let start = self.row_offset() + chunk_index as u64 * self.chunk_size;
                let upper = if self.is_last(chunk_index) {
                    ChunkBound::Unbounded
                } else {
                    ChunkBound::Row(start + self.chunk_size)
                };
                (ChunkBound::Row(start), upper)
            }
        }
    }
}
