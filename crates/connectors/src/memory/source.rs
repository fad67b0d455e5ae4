use crate::{
    error::{ConnectorError, DbError},
    source::{SourceConnection, SourceConnector},
};
use async_trait::async_trait;
use model::{
    chunk::{config::ResumePoint, task::{ChunkBound, ChunkTask}},
    core::value::Value,
    records::row::RowData,
};
use planner::{
    plan::{BoundaryRequest, CountRequest},
    query::dialect::{Dialect, Postgres},
};
use std::{
    cmp::Ordering,
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering as AtomicOrdering},
    },
    time::Duration,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchFailure {
    /// Fails with a retryable error this many more times.
    Transient(u32),
    Permanent,
}

#[derive(Debug, Default)]
struct SourceState {
    failures: HashMap<usize, FetchFailure>,
    fail_count: bool,
    fail_boundaries: bool,
    fetch_log: Vec<usize>,
    connections: usize,
}

#[derive(Debug, Default)]
struct Gauge {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// An ordered list of rows served chunk by chunk. Rows are kept sorted by the
/// key column when one is set.
#[derive(Debug, Clone)]
pub struct MemorySource {
    rows: Arc<Vec<RowData>>,
    key_column: Option<String>,
    fetch_delay: Option<Duration>,
    state: Arc<Mutex<SourceState>>,
    gauge: Arc<Gauge>,
}

impl MemorySource {
    pub fn new(rows: Vec<RowData>) -> Self {
        MemorySource {
            rows: Arc::new(rows),
            key_column: None,
            fetch_delay: None,
            state: Arc::new(Mutex::new(SourceState::default())),
            gauge: Arc::new(Gauge::default()),
        }
    }

    pub fn with_key_column(mut self, column: &str) -> Self {
        let mut rows = self.rows.as_ref().clone();
        rows.sort_by(|a, b| {
            a.get_value(column)
                .compare(&b.get_value(column))
                .unwrap_or(Ordering::Equal)
        });
        self.rows = Arc::new(rows);
        self.key_column = Some(column.to_string());
        self
    }

    /// Holds every fetch for `delay`, so overlapping chunks can be observed.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    pub fn fail_chunk_times(&self, chunk_index: usize, times: u32) {
        self.lock().failures.insert(chunk_index, FetchFailure::Transient(times));
    }

    pub fn fail_chunk_always(&self, chunk_index: usize) {
        self.lock().failures.insert(chunk_index, FetchFailure::Permanent);
    }

    pub fn fail_count(&self) {
        self.lock().fail_count = true;
    }

    pub fn fail_boundaries(&self) {
        self.lock().fail_boundaries = true;
    }

    /// Chunk indices in the order their fetches started, retries included.
    pub fn fetch_log(&self) -> Vec<usize> {
        self.lock().fetch_log.clone()
    }

    pub fn connections_opened(&self) -> usize {
        self.lock().connections
    }

    /// Highest number of fetches that were running at the same time.
    pub fn peak_concurrent_fetches(&self) -> usize {
        self.gauge.peak.load(AtomicOrdering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SourceConnector for MemorySource {
    async fn connect(&self) -> Result<Box<dyn SourceConnection>, ConnectorError> {
        self.lock().connections += 1;
        Ok(Box::new(self.clone()))
    }

    fn dialect(&self) -> Arc<dyn Dialect> {
        Arc::new(Postgres)
    }

    fn name(&self) -> String {
        "memory".to_string()
    }
}

fn after(value: &Value, bound: &Value) -> bool {
    value.compare(bound) == Some(Ordering::Greater)
}

impl MemorySource {
    fn key_of(&self, row: &RowData, column: &str) -> Value {
        row.get_value(column)
    }

    fn rows_after(&self, column: &str, resume: &ResumePoint) -> Vec<&RowData> {
        self.rows
            .iter()
            .filter(|row| match resume {
                ResumePoint::AfterKey(bound) => after(&self.key_of(row, column), bound),
                _ => true,
            })
            .collect()
    }

    fn select(&self, task: &ChunkTask) -> Result<Vec<RowData>, DbError> {
        match (&task.lower_bound, &task.upper_bound) {
            (ChunkBound::Row(start), upper) => {
                let start = (*start as usize).min(self.rows.len());
                let end = match upper {
                    ChunkBound::Row(end) => (*end as usize).min(self.rows.len()),
                    _ => self.rows.len(),
                };
                Ok(self.rows[start..end.max(start)].to_vec())
            }
            (ChunkBound::Unbounded, ChunkBound::Unbounded) => Ok(self.rows.as_ref().clone()),
            (lower, upper) => {
                let column = self.key_column.as_deref().ok_or_else(|| {
                    DbError::Query("key range requested from a source without a key column".into())
                })?;
                Ok(self
                    .rows
                    .iter()
                    .filter(|row| {
                        let key = self.key_of(row, column);
                        let above = match lower {
                            ChunkBound::Key(bound) => after(&key, bound),
                            _ => true,
                        };
                        let below = match upper {
                            ChunkBound::Key(bound) => !after(&key, bound),
                            _ => true,
                        };
                        above && below
                    })
                    .cloned()
                    .collect())
            }
        }
    }
}

struct InFlight<'a>(&'a Gauge);

impl<'a> InFlight<'a> {
    fn enter(gauge: &'a Gauge) -> Self {
        let now = gauge.in_flight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
        gauge.peak.fetch_max(now, AtomicOrdering::SeqCst);
        InFlight(gauge)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, AtomicOrdering::SeqCst);
    }
}

#[async_trait]
impl SourceConnection for MemorySource {
    async fn fetch_chunk(&self, task: &ChunkTask) -> Result<Vec<RowData>, DbError> {
        let _in_flight = InFlight::enter(&self.gauge);
        let failure = {
            let mut state = self.lock();
            state.fetch_log.push(task.chunk_index);
            match state.failures.get_mut(&task.chunk_index) {
                Some(FetchFailure::Transient(0)) | None => None,
                Some(FetchFailure::Transient(left)) => {
                    *left -= 1;
                    Some(FetchFailure::Transient(*left))
                }
                Some(FetchFailure::Permanent) => Some(FetchFailure::Permanent),
            }
        };

        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(FetchFailure::Transient(_)) => Err(DbError::Unavailable(format!(
                "chunk {} source temporarily unavailable",
                task.chunk_index
            ))),
            Some(FetchFailure::Permanent) => Err(DbError::Query(format!(
                "chunk {} query rejected",
                task.chunk_index
            ))),
            None => self.select(task),
        }
    }

    async fn count_rows(&self, request: &CountRequest) -> Result<u64, DbError> {
        if self.lock().fail_count {
            return Err(DbError::Unavailable("count unavailable".to_string()));
        }
        let count = match (&request.key_column, &request.resume) {
            (Some(column), resume @ ResumePoint::AfterKey(_)) => self.rows_after(column, resume).len(),
            _ => self.rows.len(),
        };
        Ok(count as u64)
    }

    async fn key_boundaries(&self, request: &BoundaryRequest) -> Result<Vec<Value>, DbError> {
        if self.lock().fail_boundaries {
            return Err(DbError::Unavailable("boundary probe unavailable".to_string()));
        }
        let step = request.chunk_size.max(1) as usize;
        Ok(self
            .rows_after(&request.key_column, &request.resume)
            .iter()
            .skip(step - 1)
            .step_by(step)
            .map(|row| self.key_of(row, &request.key_column))
            .collect())
    }
}
