//! Strategy-specific SQL for a single chunk. Pure functions of the source
//! query, the plan and the chunk index.

use crate::{
    error::PlanError,
    query::{
        dialect::{Dialect, NUMBERED_ALIAS, ROW_NUMBER_COLUMN, SOURCE_ALIAS},
        source::SourceQuery,
    },
};
use model::{
    chunk::{
        config::{ChunkConfig, ChunkStrategy, ResumePoint},
        task::{ChunkBound, ChunkTask},
    },
    core::value::Value,
    pagination::checkpoint::PendingRange,
};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ChunkQueryBuilder {
    dialect: Arc<dyn Dialect>,
}

impl ChunkQueryBuilder {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        ChunkQueryBuilder { dialect }
    }

    pub fn dialect(&self) -> &dyn Dialect {
        self.dialect.as_ref()
    }

    /// SQL text for chunk `chunk_index` of the plan.
    pub fn build(
        &self,
        source: &SourceQuery,
        config: &ChunkConfig,
        chunk_index: usize,
    ) -> Result<String, PlanError> {
        if chunk_index >= config.num_chunks {
            return Err(PlanError::ChunkOutOfRange {
                index: chunk_index,
                num_chunks: config.num_chunks,
            });
        }

        let (lower, upper) = config.bounds(chunk_index);
        self.range_sql(source, config, &lower, &upper)
    }

    /// SQL text for explicit bounds under the plan's strategy.
    pub fn range_sql(
        &self,
        source: &SourceQuery,
        config: &ChunkConfig,
        lower: &ChunkBound,
        upper: &ChunkBound,
    ) -> Result<String, PlanError> {
        match config.strategy {
            ChunkStrategy::KeyBased => {
                let key = config
                    .key_column
                    .as_deref()
                    .ok_or(PlanError::MissingKeyColumn)?;
                Ok(self.key_range(source, key, lower, upper))
            }
            ChunkStrategy::OffsetLimit => {
                let (offset, limit) = row_window(lower, upper);
                let order = source.outer_order_clause(self.dialect());
                Ok(self.dialect.render_offset_limit(
                    source.base_sql(),
                    order.as_deref(),
                    offset,
                    limit,
                ))
            }
            ChunkStrategy::RowidBased => {
                let (offset, limit) = row_window(lower, upper);
                let order = source.outer_order_clause(self.dialect());
                Ok(self.dialect.render_row_window(
                    source.base_sql(),
                    order.as_deref(),
                    offset,
                    limit.map(|l| offset + l),
                ))
            }
        }
    }

    pub fn task(
        &self,
        source: &SourceQuery,
        config: &ChunkConfig,
        chunk_index: usize,
    ) -> Result<ChunkTask, PlanError> {
        let sql = self.build(source, config, chunk_index)?;
        let (lower, upper) = config.bounds(chunk_index);
        Ok(ChunkTask::new(chunk_index, lower, upper, sql))
    }

    /// Every task of the plan, in index order.
    pub fn tasks(&self, source: &SourceQuery, config: &ChunkConfig) -> Result<Vec<ChunkTask>, PlanError> {
        (0..config.num_chunks)
            .map(|idx| self.task(source, config, idx))
            .collect()
    }

    /// Tasks re-reading `pending` first, then the plan's own tasks. Indices
    /// run from zero across both.
    pub fn tasks_after_pending(
        &self,
        source: &SourceQuery,
        config: &ChunkConfig,
        pending: &[PendingRange],
    ) -> Result<Vec<ChunkTask>, PlanError> {
        let mut tasks = pending
            .iter()
            .enumerate()
            .map(|(idx, range)| {
                let sql = self.range_sql(source, config, &range.lower, &range.upper)?;
                Ok(ChunkTask::new(idx, range.lower.clone(), range.upper.clone(), sql))
            })
            .collect::<Result<Vec<_>, PlanError>>()?;
        for mut task in self.tasks(source, config)? {
            task.chunk_index += pending.len();
            tasks.push(task);
        }
        Ok(tasks)
    }

    fn key_range(&self, source: &SourceQuery, key: &str, lower: &ChunkBound, upper: &ChunkBound) -> String {
        let quoted = self.dialect.quote_identifier(key);
        let mut predicates = Vec::new();
        if let ChunkBound::Key(value) = lower {
            predicates.push(format!("{quoted} > {}", self.dialect.render_literal(value)));
        }
        if let ChunkBound::Key(value) = upper {
            predicates.push(format!("{quoted} <= {}", self.dialect.render_literal(value)));
        }

        let mut sql = format!(
            "SELECT * FROM ({}) {}",
            source.base_sql(),
            self.dialect.derived_alias(SOURCE_ALIAS)
        );
        if !predicates.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&predicates.join(" AND "));
        }
        sql.push_str(&format!(" ORDER BY {quoted} ASC"));
        sql
    }

    /// Predicate restricting the source to rows after a key checkpoint.
    fn resume_filter(&self, key: Option<&str>, resume: &ResumePoint) -> Option<String> {
        match (key, resume) {
            (Some(key), ResumePoint::AfterKey(value)) => Some(format!(
                "{} > {}",
                self.dialect.quote_identifier(key),
                self.dialect.render_literal(value)
            )),
            _ => None,
        }
    }

    /// Counts the rows that remain to be read.
    pub fn count_query(&self, source: &SourceQuery, key: Option<&str>, resume: &ResumePoint) -> String {
        let mut sql = format!(
            "SELECT COUNT(*) FROM ({}) {}",
            source.base_sql(),
            self.dialect.derived_alias(SOURCE_ALIAS)
        );
        if let Some(filter) = self.resume_filter(key, resume) {
            sql.push_str(&format!(" WHERE {filter}"));
        }
        sql
    }

    /// Returns every `chunk_size`-th key value in key order. Each one is the
    /// inclusive upper bound of a chunk.
    pub fn boundary_query(
        &self,
        source: &SourceQuery,
        key: &str,
        chunk_size: u64,
        resume: &ResumePoint,
    ) -> String {
        let quoted = self.dialect.quote_identifier(key);
        let rn = self.dialect.quote_identifier(ROW_NUMBER_COLUMN);
        let mut inner = format!(
            "SELECT {quoted}, ROW_NUMBER() OVER (ORDER BY {quoted}) AS {rn} FROM ({}) {}",
            source.base_sql(),
            self.dialect.derived_alias(SOURCE_ALIAS)
        );
        if let Some(filter) = self.resume_filter(Some(key), resume) {
            inner.push_str(&format!(" WHERE {filter}"));
        }
        format!(
            "SELECT {quoted} FROM ({inner}) {} WHERE {} = 0 ORDER BY {quoted}",
            self.dialect.derived_alias(NUMBERED_ALIAS),
            self.dialect.modulo(&rn, chunk_size.max(1))
        )
    }
}

/// Offset and row count of a positional chunk; `None` count means
/// open-ended.
fn row_window(lower: &ChunkBound, upper: &ChunkBound) -> (u64, Option<u64>) {
    let offset = match lower {
        ChunkBound::Row(start) => *start,
        _ => 0,
    };
    let limit = match upper {
        ChunkBound::Row(end) => Some(end.saturating_sub(offset)),
        _ => None,
    };
    (offset, limit)
}

/// Largest key value among `values` that can be ordered.
pub fn max_key<'a>(values: impl IntoIterator<Item = &'a Value>) -> Option<Value> {
    values
        .into_iter()
        .filter(|v| !v.is_null())
        .cloned()
        .reduce(Value::max_of)
}
