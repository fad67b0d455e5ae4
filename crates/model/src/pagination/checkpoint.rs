use crate::{
    chunk::task::{ChunkBound, ChunkTask},
    execution::load::CheckpointStrategy,
    pagination::cursor::Cursor,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bounds of a chunk at or below the checkpoint position that never
/// committed. The next run reads it again before moving on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PendingRange {
    pub lower: ChunkBound,
    pub upper: ChunkBound,
}

impl From<&ChunkTask> for PendingRange {
    fn from(task: &ChunkTask) -> Self {
        PendingRange {
            lower: task.lower_bound.clone(),
            upper: task.upper_bound.clone(),
        }
    }
}

/// Last safely committed position of a job, as persisted between runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub job_id: String,
    pub strategy: CheckpointStrategy,
    pub cursor: Cursor,
    pub rows_done: u64,
    pub run_id: String,
    /// Digest of the job definition the checkpoint was taken under.
    pub fingerprint: String,
    #[serde(default)]
    pub pending_ranges: Vec<PendingRange>,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(job_id: &str, strategy: CheckpointStrategy, run_id: &str) -> Self {
        Checkpoint {
            job_id: job_id.to_string(),
            strategy,
            cursor: Cursor::None,
            rows_done: 0,
            run_id: run_id.to_string(),
            fingerprint: String::new(),
            pending_ranges: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: &str) -> Self {
        self.fingerprint = fingerprint.to_string();
        self
    }

    pub fn with_cursor(mut self, cursor: Cursor, rows_done: u64) -> Self {
        self.cursor = cursor;
        self.rows_done = rows_done;
        self.updated_at = Utc::now();
        self
    }

    pub fn with_pending_ranges(mut self, ranges: Vec<PendingRange>) -> Self {
        self.pending_ranges = ranges;
        self
    }

    /// Whether every chunk up to the cursor has committed.
    pub fn is_contiguous(&self) -> bool {
        self.pending_ranges.is_empty()
    }
}
