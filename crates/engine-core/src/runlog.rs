//! Destinations for job results and row-level error records.

use crate::error::RunLogError;
use async_trait::async_trait;
use model::{chunk::result::JobResult, execution::failed_row::RowError};
use serde::Serialize;
use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;
use tracing::debug;

pub const JOBS_FILE: &str = "jobs.jsonl";
pub const ROW_ERRORS_FILE: &str = "row_errors.jsonl";

#[async_trait]
pub trait RunLogSink: Send + Sync {
    async fn record_job(&self, result: &JobResult) -> Result<(), RunLogError>;

    async fn record_row_errors(&self, errors: &[RowError]) -> Result<(), RunLogError>;
}

/// Appends one JSON object per line to files under a directory.
pub struct JsonlRunLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRunLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        JsonlRunLog {
            dir: dir.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn jobs_path(&self) -> PathBuf {
        self.dir.join(JOBS_FILE)
    }

    pub fn row_errors_path(&self) -> PathBuf {
        self.dir.join(ROW_ERRORS_FILE)
    }

    fn append<T: Serialize>(&self, path: &Path, items: &[T]) -> Result<(), RunLogError> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut buf = Vec::new();
        for item in items {
            serde_json::to_writer(&mut buf, item)?;
            buf.push(b'\n');
        }
        file.write_all(&buf)?;
        file.flush()?;
        Ok(())
    }
}

#[async_trait]
impl RunLogSink for JsonlRunLog {
    async fn record_job(&self, result: &JobResult) -> Result<(), RunLogError> {
        let _guard = self.write_lock.lock().await;
        self.append(&self.jobs_path(), std::slice::from_ref(result))
    }

    async fn record_row_errors(&self, errors: &[RowError]) -> Result<(), RunLogError> {
        if errors.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock.lock().await;
        debug!(count = errors.len(), "Writing row errors");
        self.append(&self.row_errors_path(), errors)
    }
}

#[derive(Debug, Default)]
pub struct MemoryRunLog {
    jobs: Mutex<Vec<JobResult>>,
    row_errors: Mutex<Vec<RowError>>,
}

impl MemoryRunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn jobs(&self) -> Vec<JobResult> {
        self.jobs.lock().await.clone()
    }

    pub async fn row_errors(&self) -> Vec<RowError> {
        self.row_errors.lock().await.clone()
    }
}

#[async_trait]
impl RunLogSink for MemoryRunLog {
    async fn record_job(&self, result: &JobResult) -> Result<(), RunLogError> {
        self.jobs.lock().await.push(result.clone());
        Ok(())
    }

    async fn record_row_errors(&self, errors: &[RowError]) -> Result<(), RunLogError> {
        self.row_errors.lock().await.extend_from_slice(errors);
        Ok(())
    }
}
