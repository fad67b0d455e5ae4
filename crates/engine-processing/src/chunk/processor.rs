use crate::{
    error::ChunkError,
    merge::{KeyedRow, RowClass, ScdMerger},
    retry::{classify_db_error, is_connection_lost},
    transform::TransformPipeline,
};
use chrono::Utc;
use connectors::{
    error::DbError,
    source::SourceConnection,
    target::{OpOutcome, TargetConnection, WriteOp},
};
use engine_core::{
    error::{SinkError, SourceError},
    retry::{RetryDisposition, RetryPolicy},
};
use model::{
    chunk::{
        result::{ChunkResult, RowCounts},
        task::ChunkTask,
    },
    core::value::Value,
    execution::{
        failed_row::{ProcessingStage, RowError},
        load::LoadMode,
        target::TargetTable,
    },
    records::row::RowData,
};
use planner::query::chunk::max_key;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// `Extracting -> Transforming -> Loading -> {Committed | Failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Extracting,
    Transforming,
    Loading,
    Committed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub job_id: String,
    pub run_id: String,
    pub fail_fast: bool,
    pub extract_retry: RetryPolicy,
    /// Column whose maximum is reported as the chunk's checkpoint value.
    pub checkpoint_column: Option<String>,
}

impl ProcessorOptions {
    pub fn new(job_id: &str, run_id: &str) -> Self {
        ProcessorOptions {
            job_id: job_id.to_string(),
            run_id: run_id.to_string(),
            fail_fast: false,
            extract_retry: RetryPolicy::default(),
            checkpoint_column: None,
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_extract_retry(mut self, policy: RetryPolicy) -> Self {
        self.extract_retry = policy;
        self
    }

    pub fn with_checkpoint_column(mut self, column: Option<String>) -> Self {
        self.checkpoint_column = column;
        self
    }
}

/// What a chunk run produced, including what the caller needs to decide
/// whether the connections can be reused.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub result: ChunkResult,
    pub row_errors: Vec<RowError>,
    pub error: Option<ChunkError>,
    pub source_broken: bool,
    pub target_broken: bool,
}

/// Runs one chunk through extract, transform and load inside a single
/// target transaction.
pub struct ChunkProcessor {
    options: ProcessorOptions,
    merger: ScdMerger,
    transforms: TransformPipeline,
}

struct ChunkRun<'a> {
    task: &'a ChunkTask,
    options: &'a ProcessorOptions,
    state: ChunkState,
    started: Instant,
    attempts: usize,
    rows_extracted: u64,
    row_errors: Vec<RowError>,
    source_broken: bool,
    target_broken: bool,
    /// A target transaction is open and must be rolled back on failure.
    in_transaction: bool,
}

impl<'a> ChunkRun<'a> {
    fn new(task: &'a ChunkTask, options: &'a ProcessorOptions) -> Self {
        ChunkRun {
            task,
            options,
            state: ChunkState::Extracting,
            started: Instant::now(),
            attempts: 0,
            rows_extracted: 0,
            row_errors: Vec::new(),
            source_broken: false,
            target_broken: false,
            in_transaction: false,
        }
    }

    fn enter(&mut self, state: ChunkState) {
        debug!(chunk = self.task.chunk_index, from = ?self.state, to = ?state, "Chunk state change");
        self.state = state;
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn check_deadline(&self) -> Result<(), ChunkError> {
        match self.task.deadline {
            Some(limit) if self.started.elapsed() >= limit => Err(ChunkError::Deadline(limit)),
            _ => Ok(()),
        }
    }

    fn row_error(
        &mut self,
        stage: ProcessingStage,
        row_index: usize,
        code: &str,
        message: String,
        row: &RowData,
    ) {
        warn!(
            chunk = self.task.chunk_index,
            row = row_index,
            %stage,
            code,
            error = %message,
            "Row failed"
        );
        let record = RowError::new(stage, self.task.chunk_index, row_index, code, message)
            .with_run_context(&self.options.job_id, &self.options.run_id)
            .with_snapshot(row.to_map());
        self.row_errors.push(record);
    }

    fn fail(mut self, err: ChunkError) -> ChunkOutcome {
        self.enter(ChunkState::Failed);
        let duration_ms = self.elapsed_ms();
        error!(
            job_id = %self.options.job_id,
            run_id = %self.options.run_id,
            chunk = self.task.chunk_index,
            rows = self.rows_extracted,
            category = err.category(),
            duration_ms,
            error = %err,
            "Chunk failed"
        );
        let result = ChunkResult::failed(
            self.task.chunk_index,
            self.rows_extracted,
            err.to_string(),
            self.attempts as u32,
            duration_ms,
        );
        ChunkOutcome {
            result,
            row_errors: self.row_errors,
            error: Some(err),
            source_broken: self.source_broken,
            target_broken: self.target_broken,
        }
    }

    fn commit(mut self, counts: RowCounts, max_seen: Option<Value>) -> ChunkOutcome {
        self.enter(ChunkState::Committed);
        let duration_ms = self.elapsed_ms();
        info!(
            job_id = %self.options.job_id,
            run_id = %self.options.run_id,
            chunk = self.task.chunk_index,
            rows = self.rows_extracted,
            new = counts.new,
            changed = counts.changed,
            unchanged = counts.unchanged,
            failed = counts.failed,
            duration_ms,
            "Chunk committed"
        );
        let result = ChunkResult::committed(
            self.task.chunk_index,
            counts,
            max_seen,
            self.attempts as u32,
            duration_ms,
        );
        ChunkOutcome {
            result,
            row_errors: self.row_errors,
            error: None,
            source_broken: self.source_broken,
            target_broken: self.target_broken,
        }
    }
}

fn tally(counts: &mut RowCounts, class: RowClass) {
    match class {
        RowClass::New => counts.new += 1,
        RowClass::Changed => counts.changed += 1,
        RowClass::Unchanged => counts.unchanged += 1,
    }
}

impl ChunkProcessor {
    pub fn new(table: TargetTable, mode: LoadMode, options: ProcessorOptions) -> Self {
        ChunkProcessor {
            options,
            merger: ScdMerger::new(mode, table),
            transforms: TransformPipeline::new(),
        }
    }

    pub fn with_transforms(mut self, transforms: TransformPipeline) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.options
    }

    pub fn table(&self) -> &TargetTable {
        self.merger.table()
    }

    pub async fn process(
        &self,
        task: &ChunkTask,
        source: &dyn SourceConnection,
        target: &mut dyn TargetConnection,
    ) -> ChunkOutcome {
        let mut run = ChunkRun::new(task, &self.options);

        if let Err(err) = run.check_deadline() {
            return run.fail(err);
        }
        debug!(chunk = task.chunk_index, sql = %task.sql, "Extracting chunk");
        let extracted = self
            .options
            .extract_retry
            .run(|| source.fetch_chunk(task), classify_db_error)
            .await;
        let rows = match extracted {
            Ok(attempted) => {
                run.attempts = attempted.attempts;
                attempted.value
            }
            Err(err) => {
                let attempts = err.attempts();
                let source_err = err.into_inner();
                run.attempts = attempts;
                run.source_broken = is_connection_lost(&source_err)
                    || classify_db_error(&source_err) == RetryDisposition::Retry;
                return run.fail(ChunkError::Extract {
                    attempts,
                    source: SourceError::Db(source_err),
                });
            }
        };
        run.rows_extracted = rows.len() as u64;

        let max_seen = self.options.checkpoint_column.as_ref().and_then(|column| {
            let keys: Vec<Value> = rows.iter().map(|row| row.get_value(column)).collect();
            max_key(&keys)
        });

        run.enter(ChunkState::Transforming);
        let mut counts = RowCounts::default();
        let keyed = match self.transform_rows(&mut run, rows, &mut counts) {
            Ok(keyed) => keyed,
            Err(err) => return run.fail(err),
        };

        if let Err(err) = run.check_deadline() {
            return run.fail(err);
        }
        run.enter(ChunkState::Loading);
        match self.load(&mut run, keyed, target, &mut counts).await {
            Ok(()) => run.commit(counts, max_seen),
            Err(err) => {
                if run.in_transaction
                    && let Err(rollback_err) = target.rollback().await
                {
                    warn!(chunk = task.chunk_index, error = %rollback_err, "Rollback failed");
                    run.target_broken = true;
                }
                run.fail(err)
            }
        }
    }

    fn transform_rows(
        &self,
        run: &mut ChunkRun<'_>,
        rows: Vec<RowData>,
        counts: &mut RowCounts,
    ) -> Result<Vec<KeyedRow>, ChunkError> {
        let mut keyed = Vec::with_capacity(rows.len());
        for (row_index, row) in rows.into_iter().enumerate() {
            let transformed = if self.transforms.is_empty() {
                Ok(row)
            } else {
                self.transforms.apply(row.clone()).map_err(|err| (err, row))
            };
            let transformed = match transformed {
                Ok(transformed) => transformed,
                Err((err, original)) => {
                    counts.failed += 1;
                    run.row_error(
                        ProcessingStage::Transform,
                        row_index,
                        err.code(),
                        err.to_string(),
                        &original,
                    );
                    if self.options.fail_fast {
                        return Err(ChunkError::Transform {
                            row_index,
                            source: err,
                        });
                    }
                    continue;
                }
            };

            match self.merger.business_key(&transformed) {
                Ok(key) => keyed.push(self.merger.keyed(row_index, transformed, key)),
                Err(err) => {
                    counts.failed += 1;
                    run.row_error(
                        ProcessingStage::Load,
                        row_index,
                        err.code(),
                        err.to_string(),
                        &transformed,
                    );
                    if self.options.fail_fast {
                        return Err(ChunkError::Rejected {
                            row_index,
                            code: err.code().to_string(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
        Ok(keyed)
    }

    async fn load(
        &self,
        run: &mut ChunkRun<'_>,
        keyed: Vec<KeyedRow>,
        target: &mut dyn TargetConnection,
        counts: &mut RowCounts,
    ) -> Result<(), ChunkError> {
        let table = self.merger.table();
        let existing = if self.merger.needs_lookup() && !keyed.is_empty() {
            let keys: Vec<Vec<Value>> = keyed.iter().map(|k| k.key.clone()).collect();
            target
                .existing_rows(table, &keys, self.merger.current_only())
                .await
                .map_err(|err| sink_error(run, err))?
        } else {
            Vec::new()
        };

        let plan = self.merger.plan(keyed, &existing, Utc::now());
        let mut ops: Vec<WriteOp> = Vec::with_capacity(plan.write_count());
        let mut owners: Vec<(usize, RowClass)> = Vec::with_capacity(plan.write_count());
        for planned in plan.rows {
            match planned.op {
                Some(op) => {
                    ops.push(op);
                    owners.push((planned.row_index, planned.class));
                }
                None => tally(counts, planned.class),
            }
        }

        target.begin().await.map_err(|err| sink_error(run, err))?;
        run.in_transaction = true;
        let outcomes = if ops.is_empty() {
            Vec::new()
        } else {
            target
                .apply(table, &ops)
                .await
                .map_err(|err| sink_error(run, err))?
        };
        if outcomes.len() != ops.len() {
            return Err(ChunkError::Load(SinkError::Db(DbError::Write(format!(
                "target reported {} outcomes for {} writes",
                outcomes.len(),
                ops.len()
            )))));
        }

        for ((op, (row_index, class)), outcome) in ops.iter().zip(owners).zip(outcomes) {
            match outcome {
                OpOutcome::Applied => tally(counts, class),
                OpOutcome::Rejected { code, message } => {
                    counts.failed += 1;
                    run.row_error(ProcessingStage::Load, row_index, &code, message.clone(), op.row());
                    if self.options.fail_fast {
                        return Err(ChunkError::Rejected {
                            row_index,
                            code,
                            message,
                        });
                    }
                }
            }
        }

        run.check_deadline()?;
        // A failed COMMIT ends the transaction on its own.
        run.in_transaction = false;
        target.commit().await.map_err(|err| {
            run.target_broken = true;
            ChunkError::Load(SinkError::Db(err))
        })
    }
}

fn sink_error(run: &mut ChunkRun<'_>, err: DbError) -> ChunkError {
    if is_connection_lost(&err) {
        run.target_broken = true;
    }
    ChunkError::Load(SinkError::Db(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformError;
    use connectors::{
        memory::{MemorySource, MemoryTarget},
        target::TargetConnector,
    };
    use model::chunk::{result::ChunkStatus, task::ChunkBound};
    use std::{sync::Arc, time::Duration};
    use tracing_test::traced_test;

    fn rows(range: std::ops::Range<i64>) -> Vec<RowData> {
        range
            .map(|id| {
                RowData::from_pairs(
                    "orders",
                    [
                        ("order_id", Value::Int(id)),
                        ("amount", Value::Int(id * 10)),
                    ],
                )
            })
            .collect()
    }

    fn table() -> TargetTable {
        TargetTable::new("orders").with_business_key(&["order_id"])
    }

    fn options() -> ProcessorOptions {
        ProcessorOptions::new("job", "run")
            .with_extract_retry(RetryPolicy::new(3, Duration::ZERO, Duration::ZERO))
            .with_checkpoint_column(Some("order_id".into()))
    }

    fn whole(index: usize) -> ChunkTask {
        ChunkTask::new(index, ChunkBound::Row(0), ChunkBound::Unbounded, String::new())
    }

    async fn run(processor: &ChunkProcessor, source: &MemorySource, target: &MemoryTarget, task: &ChunkTask) -> ChunkOutcome {
        let mut conn = target.connect().await.unwrap();
        processor.process(task, source, conn.as_mut()).await
    }

    #[tokio::test]
    async fn test_commits_new_rows_and_reports_max_key() {
        let source = MemorySource::new(rows(1..6));
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Upsert, options());

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        let result = &outcome.result;
        assert_eq!(result.status, ChunkStatus::Success);
        assert_eq!(result.rows_extracted, 5);
        assert_eq!(result.rows_new, 5);
        assert_eq!(result.rows_successful + result.rows_failed, result.rows_extracted);
        assert_eq!(result.max_checkpoint_value_seen, Some(Value::Int(5)));
        assert_eq!(result.attempts, 1);
        assert_eq!(target.rows().len(), 5);
        assert_eq!(target.commits(), 1);
        assert!(target.rows().iter().all(|r| r.contains("row_hash")));
    }

    #[tokio::test]
    async fn test_upsert_rerun_leaves_target_unchanged() {
        let source = MemorySource::new(rows(1..4));
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Upsert, options());

        run(&processor, &source, &target, &whole(0)).await;
        let before = target.rows();
        let again = run(&processor, &source, &target, &whole(0)).await;

        assert_eq!(again.result.rows_unchanged, 3);
        assert_eq!(again.result.rows_new, 0);
        assert_eq!(target.rows(), before);
    }

    #[tokio::test]
    async fn test_transform_errors_fail_only_their_rows() {
        let source = MemorySource::new(rows(1..5));
        let target = MemoryTarget::new();
        let pipeline = TransformPipeline::new().add_fn(|row| {
            if row.get_value("order_id") == Value::Int(2) {
                Err(TransformError::ValidationFailed {
                    rule: "amount".into(),
                    message: "rejected".into(),
                })
            } else {
                Ok(row)
            }
        });
        let processor =
            ChunkProcessor::new(table(), LoadMode::Insert, options()).with_transforms(pipeline);

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        assert_eq!(outcome.result.status, ChunkStatus::Partial);
        assert_eq!(outcome.result.rows_failed, 1);
        assert_eq!(outcome.result.rows_successful, 3);
        assert_eq!(outcome.row_errors.len(), 1);
        let recorded = &outcome.row_errors[0];
        assert_eq!(recorded.row_index, 1);
        assert_eq!(recorded.stage, ProcessingStage::Transform);
        assert_eq!(recorded.error_code, "VALIDATION_FAILED");
        assert_eq!(recorded.job_id, "job");
        assert_eq!(recorded.row_snapshot.get("order_id"), Some(&Value::Int(2)));
        assert_eq!(target.rows().len(), 3);
    }

    #[tokio::test]
    async fn test_fail_fast_rolls_back_the_chunk() {
        let source = MemorySource::new(rows(1..5));
        let target = MemoryTarget::new().with_rejector(Arc::new(|row: &RowData| {
            (row.get_value("order_id") == Value::Int(3))
                .then(|| ("23505".to_string(), "duplicate key".to_string()))
        }));
        let processor =
            ChunkProcessor::new(table(), LoadMode::Insert, options().with_fail_fast(true));

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        assert_eq!(outcome.result.status, ChunkStatus::Failed);
        assert!(!outcome.result.committed);
        assert_eq!(outcome.result.rows_failed, 4);
        assert!(matches!(outcome.error, Some(ChunkError::Rejected { row_index: 2, .. })));
        assert!(target.rows().is_empty());
        assert_eq!(target.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_rejected_rows_are_counted_without_fail_fast() {
        let source = MemorySource::new(rows(1..5));
        let target = MemoryTarget::new().with_rejector(Arc::new(|row: &RowData| {
            (row.get_value("order_id") == Value::Int(3))
                .then(|| ("22001".to_string(), "value too long".to_string()))
        }));
        let processor = ChunkProcessor::new(table(), LoadMode::Insert, options());

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        assert!(outcome.result.committed);
        assert_eq!(outcome.result.rows_new, 3);
        assert_eq!(outcome.result.rows_failed, 1);
        assert_eq!(outcome.row_errors[0].error_code, "22001");
        assert_eq!(outcome.row_errors[0].stage, ProcessingStage::Load);
        assert_eq!(target.rows().len(), 3);
    }

    #[tokio::test]
    async fn test_transient_extract_errors_are_retried() {
        let source = MemorySource::new(rows(1..3));
        source.fail_chunk_times(0, 2);
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Insert, options());

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        assert!(outcome.result.committed);
        assert_eq!(outcome.result.attempts, 3);
    }

    #[tokio::test]
    async fn test_permanent_extract_error_fails_without_retry() {
        let source = MemorySource::new(rows(1..3));
        source.fail_chunk_always(0);
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Insert, options());

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        assert_eq!(outcome.result.status, ChunkStatus::Failed);
        assert_eq!(outcome.result.attempts, 1);
        assert_eq!(outcome.result.rows_extracted, 0);
        assert!(matches!(outcome.error, Some(ChunkError::Extract { .. })));
        assert_eq!(target.commits(), 0);
    }

    #[tokio::test]
    async fn test_failed_commit_marks_target_broken() {
        let source = MemorySource::new(rows(1..3));
        let target = MemoryTarget::new();
        target.fail_next_commits(1);
        let processor = ChunkProcessor::new(table(), LoadMode::Insert, options());

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        assert_eq!(outcome.result.status, ChunkStatus::Failed);
        assert_eq!(outcome.result.rows_failed, 2);
        assert!(outcome.target_broken);
        assert!(target.rows().is_empty());
        assert_eq!(target.stray_rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_failed_lookup_does_not_roll_back_an_unopened_transaction() {
        let source = MemorySource::new(rows(1..4));
        let target = MemoryTarget::new();
        target.fail_next_lookups(1);
        let processor = ChunkProcessor::new(table(), LoadMode::Upsert, options());

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        assert_eq!(outcome.result.status, ChunkStatus::Failed);
        assert!(matches!(outcome.error, Some(ChunkError::Load(_))));
        assert!(!outcome.target_broken);
        assert_eq!(target.stray_rollbacks(), 0);
        assert_eq!(target.rollbacks(), 0);

        // The connection is still usable for the retry.
        let again = run(&processor, &source, &target, &whole(0)).await;
        assert!(again.result.committed);
        assert_eq!(target.rows().len(), 3);
    }

    #[tokio::test]
    async fn test_expired_deadline_fails_before_extract() {
        let source = MemorySource::new(rows(1..3));
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Insert, options());
        let task = whole(0).with_deadline(Some(Duration::ZERO));

        let outcome = run(&processor, &source, &target, &task).await;
        assert!(matches!(outcome.error, Some(ChunkError::Deadline(_))));
        assert!(source.fetch_log().is_empty());
    }

    #[tokio::test]
    async fn test_slow_extract_misses_the_load_deadline() {
        let source = MemorySource::new(rows(1..3)).with_fetch_delay(Duration::from_millis(50));
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Insert, options());
        let task = whole(0).with_deadline(Some(Duration::from_millis(10)));

        let outcome = run(&processor, &source, &target, &task).await;
        assert!(matches!(outcome.error, Some(ChunkError::Deadline(_))));
        assert_eq!(outcome.result.rows_failed, 2);
        assert_eq!(target.commits(), 0);
    }

    #[tokio::test]
    async fn test_scd2_versions_changed_rows() {
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Scd2, options());
        run(&processor, &MemorySource::new(rows(1..3)), &target, &whole(0)).await;

        let mut changed = rows(1..3);
        changed[1].set("amount", Value::Int(999));
        let outcome = run(&processor, &MemorySource::new(changed), &target, &whole(0)).await;

        assert_eq!(outcome.result.rows_unchanged, 1);
        assert_eq!(outcome.result.rows_changed, 1);
        assert_eq!(target.rows().len(), 3);
        let current = target.current_rows("is_current");
        assert_eq!(current.len(), 2);
        assert!(current.iter().any(|r| r.get_value("amount") == Value::Int(999)));
    }

    #[tokio::test]
    async fn test_missing_key_is_a_row_error() {
        let mut input = rows(1..3);
        input[0].remove("order_id");
        let source = MemorySource::new(input);
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Upsert, options());

        let outcome = run(&processor, &source, &target, &whole(0)).await;
        assert_eq!(outcome.result.rows_failed, 1);
        assert_eq!(outcome.row_errors[0].error_code, "MISSING_KEY");
        assert_eq!(target.rows().len(), 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_logs_chunk_failure_category() {
        let source = MemorySource::new(rows(1..3));
        source.fail_chunk_always(4);
        let target = MemoryTarget::new();
        let processor = ChunkProcessor::new(table(), LoadMode::Insert, options());

        run(&processor, &source, &target, &whole(4)).await;
        assert!(logs_contain("Chunk failed"));
        assert!(logs_contain("EXTRACT"));
    }
}
