use crate::{
    error::PlanError,
    query::{chunk::ChunkQueryBuilder, dialect::Dialect, source::SourceQuery},
};
use async_trait::async_trait;
use model::{
    chunk::config::{ChunkConfig, ChunkStrategy, DEFAULT_CHUNK_SIZE, ResumePoint},
    core::value::Value,
};
use std::sync::Arc;
use tracing::{info, warn};

pub type ProbeError = Box<dyn std::error::Error + Send + Sync>;

/// Counts the rows left to read. SQL sources run `sql`; other record sources
/// answer from the structured fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CountRequest {
    pub sql: String,
    pub key_column: Option<String>,
    pub resume: ResumePoint,
}

/// Asks for every `chunk_size`-th key value, in key order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRequest {
    pub sql: String,
    pub key_column: String,
    pub chunk_size: u64,
    pub resume: ResumePoint,
}

/// Read access the planner needs to size a job.
#[async_trait]
pub trait PlanProbe: Send + Sync {
    async fn count_rows(&self, request: &CountRequest) -> Result<u64, ProbeError>;

    async fn key_boundaries(&self, request: &BoundaryRequest) -> Result<Vec<Value>, ProbeError>;
}

/// Decides how a source query is split into chunks.
#[derive(Debug, Clone)]
pub struct ChunkPlanner {
    dialect: Arc<dyn Dialect>,
    chunk_size: u64,
    row_count_hint: Option<u64>,
    resume: ResumePoint,
    forced_strategy: Option<ChunkStrategy>,
    key_column: Option<String>,
    position_only: bool,
}

impl ChunkPlanner {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        ChunkPlanner {
            dialect,
            chunk_size: DEFAULT_CHUNK_SIZE,
            row_count_hint: None,
            resume: ResumePoint::Start,
            forced_strategy: None,
            key_column: None,
            position_only: false,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_row_count_hint(mut self, hint: Option<u64>) -> Self {
        self.row_count_hint = hint;
        self
    }

    pub fn with_resume(mut self, resume: ResumePoint) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_forced_strategy(mut self, strategy: Option<ChunkStrategy>) -> Self {
        self.forced_strategy = strategy;
        self
    }

    /// Uses `column` as the chunking key instead of the first ORDER BY column.
    pub fn with_key_column(mut self, column: Option<String>) -> Self {
        self.key_column = column;
        self
    }

    /// Restricts planning to position-based strategies.
    pub fn position_only(mut self, position_only: bool) -> Self {
        self.position_only = position_only;
        self
    }

    fn candidate_key(&self, source: &SourceQuery) -> Option<String> {
        self.key_column
            .clone()
            .or_else(|| source.key_column().map(str::to_string))
    }

    fn positional_fallback(&self) -> ChunkStrategy {
        if self.dialect.supports_offset_limit() {
            ChunkStrategy::OffsetLimit
        } else {
            ChunkStrategy::RowidBased
        }
    }

    fn validated_key(&self, source: &SourceQuery) -> Result<String, PlanError> {
        let key = self
            .candidate_key(source)
            .ok_or(PlanError::MissingKeyColumn)?;
        if !source.projects(&key) {
            return Err(PlanError::KeyNotProjected { column: key });
        }
        if !self.dialect.supports_key_range() {
            return Err(PlanError::UnsupportedStrategy {
                strategy: ChunkStrategy::KeyBased,
                dialect: self.dialect.name(),
            });
        }
        Ok(key)
    }

    /// Picks the chunking strategy and key column without touching the
    /// source.
    pub fn choose_strategy(
        &self,
        source: &SourceQuery,
    ) -> Result<(ChunkStrategy, Option<String>), PlanError> {
        if self.chunk_size == 0 {
            return Err(PlanError::InvalidChunkSize);
        }

        match self.forced_strategy {
            Some(ChunkStrategy::KeyBased) if self.position_only => {
                warn!("Key-based chunking requested with row-skip checkpoints; using positional chunks");
                Ok((self.positional_fallback(), None))
            }
            Some(ChunkStrategy::KeyBased) => {
                Ok((ChunkStrategy::KeyBased, Some(self.validated_key(source)?)))
            }
            Some(strategy) => Ok((strategy, None)),
            None => {
                let key_usable = !self.position_only
                    && self.dialect.supports_key_range()
                    && self.candidate_key(source).is_some();
                if key_usable {
                    Ok((ChunkStrategy::KeyBased, Some(self.validated_key(source)?)))
                } else {
                    Ok((self.positional_fallback(), None))
                }
            }
        }
    }

    pub async fn plan(
        &self,
        source: &SourceQuery,
        probe: &dyn PlanProbe,
    ) -> Result<ChunkConfig, PlanError> {
        let (strategy, key) = self.choose_strategy(source)?;
        let resume = match (&self.resume, strategy) {
            (ResumePoint::AfterKey(_), s) if s.is_positional() => {
                warn!(%strategy, "Key checkpoint cannot resume positional chunks; starting over");
                ResumePoint::Start
            }
            (ResumePoint::AfterRows(_), ChunkStrategy::KeyBased) => {
                warn!("Row-skip checkpoint cannot resume key-based chunks; starting over");
                ResumePoint::Start
            }
            (resume, _) => resume.clone(),
        };

        let builder = ChunkQueryBuilder::new(self.dialect.clone());
        let degraded = |estimate: Option<u64>| {
            let mut config = ChunkConfig::single(strategy, self.chunk_size, resume.clone());
            config.key_column = key.clone();
            config.estimated_total_rows = estimate;
            config
        };

        let estimate = match self.row_count_hint {
            Some(hint) => hint,
            None => {
                let request = CountRequest {
                    sql: builder.count_query(source, key.as_deref(), &resume),
                    key_column: key.clone(),
                    resume: resume.clone(),
                };
                match probe.count_rows(&request).await {
                    Ok(total) => match &resume {
                        ResumePoint::AfterRows(skipped) => total.saturating_sub(*skipped),
                        _ => total,
                    },
                    Err(error) => {
                        warn!(%error, "Row count failed; running as a single chunk without parallelism");
                        return Ok(degraded(None));
                    }
                }
            }
        };

        let mut num_chunks = ChunkConfig::chunk_count_for(estimate, self.chunk_size);
        let mut key_boundaries = Vec::new();

        if let (ChunkStrategy::KeyBased, Some(key)) = (strategy, key.as_deref())
            && num_chunks > 1
        {
            let request = BoundaryRequest {
                sql: builder.boundary_query(source, key, self.chunk_size, &resume),
                key_column: key.to_string(),
                chunk_size: self.chunk_size,
                resume: resume.clone(),
            };
            match probe.key_boundaries(&request).await {
                Ok(values) => {
                    key_boundaries = distinct_boundaries(values, num_chunks - 1);
                    num_chunks = key_boundaries.len() + 1;
                }
                Err(error) => {
                    warn!(%error, "Key boundary probe failed; running as a single chunk without parallelism");
                    return Ok(degraded(Some(estimate)));
                }
            }
        }

        info!(
            %strategy,
            num_chunks,
            estimated_rows = estimate,
            chunk_size = self.chunk_size,
            key = key.as_deref().unwrap_or("-"),
            "Planned chunks"
        );

        Ok(ChunkConfig {
            strategy,
            chunk_size: self.chunk_size,
            num_chunks,
            key_column: key,
            estimated_total_rows: Some(estimate),
            parallel_allowed: true,
            resume,
            key_boundaries,
        })
    }
}

/// Keeps strictly increasing, non-null values, at most `wanted` of them.
/// Duplicate keys collapse so no chunk range is empty by construction.
fn distinct_boundaries(values: Vec<Value>, wanted: usize) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(wanted);
    for value in values.into_iter().filter(|v| !v.is_null()) {
        if out.len() == wanted {
            break;
        }
        let increasing = out
            .last()
            .map(|last| value.compare(last) == Some(std::cmp::Ordering::Greater))
            .unwrap_or(true);
        if increasing {
            out.push(value);
        }
    }
    out
}
