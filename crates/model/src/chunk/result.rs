use crate::{
    chunk::task::{ChunkBound, ChunkTask},
    core::value::Value,
    pagination::cursor::Cursor,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChunkStatus {
    Success,
    Partial,
    Failed,
}

/// Per-class row tally of a chunk. Every extracted row lands in exactly one
/// bucket.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub new: u64,
    pub changed: u64,
    pub unchanged: u64,
    pub failed: u64,
}

impl RowCounts {
    pub fn successful(&self) -> u64 {
        self.new + self.changed + self.unchanged
    }

    pub fn total(&self) -> u64 {
        self.successful() + self.failed
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub rows_extracted: u64,
    pub rows_successful: u64,
    pub rows_failed: u64,
    pub rows_new: u64,
    pub rows_changed: u64,
    pub rows_unchanged: u64,
    pub max_checkpoint_value_seen: Option<Value>,
    pub status: ChunkStatus,
    pub committed: bool,
    pub error_detail: Option<String>,
    pub attempts: u32,
    pub duration_ms: u64,
}

impl ChunkResult {
    pub fn committed(
        chunk_index: usize,
        counts: RowCounts,
        max_checkpoint_value_seen: Option<Value>,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        let status = if counts.failed == 0 {
            ChunkStatus::Success
        } else {
            ChunkStatus::Partial
        };
        ChunkResult {
            chunk_index,
            rows_extracted: counts.total(),
            rows_successful: counts.successful(),
            rows_failed: counts.failed,
            rows_new: counts.new,
            rows_changed: counts.changed,
            rows_unchanged: counts.unchanged,
            max_checkpoint_value_seen,
            status,
            committed: true,
            error_detail: None,
            attempts,
            duration_ms,
        }
    }

    /// A chunk that rolled back: whatever was extracted counts as failed.
    pub fn failed(
        chunk_index: usize,
        rows_extracted: u64,
        error: String,
        attempts: u32,
        duration_ms: u64,
    ) -> Self {
        ChunkResult {
            chunk_index,
            rows_extracted,
            rows_successful: 0,
            rows_failed: rows_extracted,
            rows_new: 0,
            rows_changed: 0,
            rows_unchanged: 0,
            max_checkpoint_value_seen: None,
            status: ChunkStatus::Failed,
            committed: false,
            error_detail: Some(error),
            attempts,
            duration_ms,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.committed
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Success,
    Partial,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStatus::Success => "SUCCESS",
            JobStatus::Partial => "PARTIAL",
            JobStatus::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Parallel,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct FailedChunk {
    pub chunk_index: usize,
    pub lower_bound: ChunkBound,
    pub upper_bound: ChunkBound,
    pub error: String,
}

/// Aggregate outcome of a job run. Built by folding chunk results in any
/// order; every counter is a plain sum.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobResult {
    pub job_id: String,
    pub run_id: String,
    pub status: JobStatus,
    pub execution_mode: ExecutionMode,
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub total_rows_processed: u64,
    pub total_rows_successful: u64,
    pub total_rows_failed: u64,
    pub rows_new: u64,
    pub rows_changed: u64,
    pub rows_unchanged: u64,
    pub checkpoint_value: Cursor,
    pub peak_concurrency: usize,
    pub cancelled: bool,
    pub failed_chunks: Vec<FailedChunk>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobResult {
    pub fn new(job_id: &str, run_id: &str, execution_mode: ExecutionMode, chunks_total: usize) -> Self {
        JobResult {
            job_id: job_id.to_string(),
            run_id: run_id.to_string(),
            status: JobStatus::Failed,
            execution_mode,
            chunks_total,
            chunks_succeeded: 0,
            chunks_failed: 0,
            total_rows_processed: 0,
            total_rows_successful: 0,
            total_rows_failed: 0,
            rows_new: 0,
            rows_changed: 0,
            rows_unchanged: 0,
            checkpoint_value: Cursor::None,
            peak_concurrency: 0,
            cancelled: false,
            failed_chunks: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn absorb(&mut self, task: &ChunkTask, result: &ChunkResult) {
        self.total_rows_processed += result.rows_extracted;
        self.total_rows_successful += result.rows_successful;
        self.total_rows_failed += result.rows_failed;
        self.rows_new += result.rows_new;
        self.rows_changed += result.rows_changed;
        self.rows_unchanged += result.rows_unchanged;

        if result.is_committed() {
            self.chunks_succeeded += 1;
        } else {
            self.chunks_failed += 1;
            self.failed_chunks.push(FailedChunk {
                chunk_index: result.chunk_index,
                lower_bound: task.lower_bound.clone(),
                upper_bound: task.upper_bound.clone(),
                error: result.error_detail.clone().unwrap_or_default(),
            });
        }
    }

    /// Seals the result: SUCCESS when every planned chunk committed without
    /// row failures, FAILED when nothing committed, PARTIAL otherwise.
    pub fn finish(&mut self, checkpoint_value: Cursor, peak_concurrency: usize, cancelled: bool) {
        self.checkpoint_value = checkpoint_value;
        self.peak_concurrency = peak_concurrency;
        self.cancelled = cancelled;
        self.failed_chunks.sort_by_key(|c| c.chunk_index);
        self.status = if self.chunks_succeeded == 0 {
            JobStatus::Failed
        } else if self.chunks_succeeded == self.chunks_total && self.total_rows_failed == 0 {
            JobStatus::Success
        } else {
            JobStatus::Partial
        };
        self.finished_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(index: usize) -> ChunkTask {
        ChunkTask::new(index, ChunkBound::Row(0), ChunkBound::Unbounded, String::new())
    }

    fn counts(new: u64, failed: u64) -> RowCounts {
        RowCounts {
            new,
            failed,
            ..Default::default()
        }
    }

    #[test]
    fn test_chunk_status_from_row_failures() {
        let ok = ChunkResult::committed(0, counts(10, 0), None, 1, 5);
        assert_eq!(ok.status, ChunkStatus::Success);
        assert_eq!(ok.rows_successful + ok.rows_failed, ok.rows_extracted);

        let partial = ChunkResult::committed(1, counts(8, 2), None, 1, 5);
        assert_eq!(partial.status, ChunkStatus::Partial);
        assert_eq!(partial.rows_extracted, 10);

        let failed = ChunkResult::failed(2, 7, "boom".into(), 3, 5);
        assert_eq!(failed.status, ChunkStatus::Failed);
        assert_eq!(failed.rows_failed, 7);
        assert!(!failed.is_committed());
    }

    #[test]
    fn test_job_status_rules() {
        let mut all_ok = JobResult::new("job", "run", ExecutionMode::Parallel, 2);
        all_ok.absorb(&task(0), &ChunkResult::committed(0, counts(5, 0), None, 1, 1));
        all_ok.absorb(&task(1), &ChunkResult::committed(1, counts(5, 0), None, 1, 1));
        all_ok.finish(Cursor::None, 2, false);
        assert_eq!(all_ok.status, JobStatus::Success);
        assert_eq!(all_ok.total_rows_successful, 10);

        let mut some = JobResult::new("job", "run", ExecutionMode::Parallel, 2);
        some.absorb(&task(1), &ChunkResult::failed(1, 5, "boom".into(), 1, 1));
        some.absorb(&task(0), &ChunkResult::committed(0, counts(5, 0), None, 1, 1));
        some.finish(Cursor::None, 2, false);
        assert_eq!(some.status, JobStatus::Partial);
        assert_eq!(some.failed_chunks[0].chunk_index, 1);
        assert_eq!(
            some.total_rows_successful + some.total_rows_failed,
            some.total_rows_processed
        );

        let mut none = JobResult::new("job", "run", ExecutionMode::Sequential, 1);
        none.absorb(&task(0), &ChunkResult::failed(0, 0, "boom".into(), 1, 1));
        none.finish(Cursor::None, 1, false);
        assert_eq!(none.status, JobStatus::Failed);
    }
}
