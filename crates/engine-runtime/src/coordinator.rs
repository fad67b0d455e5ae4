//! Runs one job: plans the chunks, dispatches them to a bounded set of
//! workers and folds their results into a single [`JobResult`].

use crate::{
    checkpoint::CheckpointTracker,
    fingerprint::job_fingerprint,
    worker::{WorkerContext, run_chunk, run_isolated},
};
use connectors::{
    source::{SourceConnector, SourceProbe},
    target::TargetConnector,
};
use engine_config::{job::JobSpec, settings::ValidatedSettings};
use engine_core::{
    error::{EngineError, SinkError, SourceError},
    metrics::Metrics,
    pool::{SourceFactory, SourcePool, TargetFactory, TargetPool},
    runlog::RunLogSink,
    state::CheckpointStore,
};
use engine_processing::{
    chunk::{ChunkOutcome, ChunkProcessor, ProcessorOptions},
    transform::TransformPipeline,
};
use model::{
    chunk::{
        config::{ChunkConfig, ChunkStrategy, ResumePoint},
        result::{ExecutionMode, JobResult},
        task::ChunkTask,
    },
    execution::load::{CheckpointStrategy, LoadMode},
    pagination::{
        checkpoint::{Checkpoint, PendingRange},
        cursor::Cursor,
    },
};
use planner::{
    plan::ChunkPlanner,
    query::{chunk::ChunkQueryBuilder, source::SourceQuery},
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Everything decided before the first chunk is dispatched.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub run_id: String,
    pub fingerprint: String,
    pub config: ChunkConfig,
    pub tasks: Vec<ChunkTask>,
    /// Leading tasks that re-read ranges the checkpoint still owes.
    pub replanned: usize,
    /// Never `Auto`.
    pub checkpoint_strategy: CheckpointStrategy,
    pub execution_mode: ExecutionMode,
    pub workers: usize,
    pub resumed_from: Option<Checkpoint>,
}

impl RunPlan {
    pub fn is_fresh_start(&self) -> bool {
        self.config.resume == ResumePoint::Start
    }
}

pub struct ParallelProcessor {
    job: JobSpec,
    settings: ValidatedSettings,
    source: Arc<dyn SourceConnector>,
    target: Arc<dyn TargetConnector>,
    store: Arc<dyn CheckpointStore>,
    run_log: Option<Arc<dyn RunLogSink>>,
    transforms: TransformPipeline,
    cancel: CancellationToken,
}

/// Mutable state of a run while chunk results arrive.
struct RunState {
    job: JobResult,
    tracker: CheckpointTracker,
    metrics: Metrics,
    fatal: Option<EngineError>,
}

impl ParallelProcessor {
    pub fn new(
        job: JobSpec,
        settings: ValidatedSettings,
        source: Arc<dyn SourceConnector>,
        target: Arc<dyn TargetConnector>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        ParallelProcessor {
            job,
            settings,
            source,
            target,
            store,
            run_log: None,
            transforms: TransformPipeline::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_run_log(mut self, run_log: Arc<dyn RunLogSink>) -> Self {
        self.run_log = Some(run_log);
        self
    }

    pub fn with_transforms(mut self, transforms: TransformPipeline) -> Self {
        self.transforms = transforms;
        self
    }

    /// Once the token fires no further chunk is dispatched; chunks already
    /// running finish and are recorded.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &ValidatedSettings {
        &self.settings
    }

    pub async fn execute(&self) -> Result<JobResult, EngineError> {
        let plan = self.plan().await?;
        self.execute_plan(plan).await
    }

    pub async fn plan(&self) -> Result<RunPlan, EngineError> {
        let job_id = &self.job.job_id;
        let fingerprint = job_fingerprint(&self.job, &self.settings);
        let configured = self.settings.checkpoint_strategy;
        let resumed_from = self.load_checkpoint(&fingerprint).await?;
        let resume = resumed_from
            .as_ref()
            .map(|cp| resume_point(&cp.cursor))
            .unwrap_or_default();

        let dialect = self.source.dialect();
        let query = SourceQuery::parse(&self.job.source.query, dialect.kind());
        let planner = ChunkPlanner::new(dialect.clone())
            .with_chunk_size(self.settings.chunk_size)
            .with_row_count_hint(self.settings.row_count_hint)
            .with_resume(resume)
            .with_forced_strategy(self.settings.forced_strategy)
            .with_key_column(self.settings.checkpoint_column.clone())
            .position_only(configured == CheckpointStrategy::RowSkip);

        let probe = self.source.connect().await.map_err(SourceError::from)?;
        let config = planner.plan(&query, &SourceProbe(probe.as_ref())).await?;
        drop(probe);

        let checkpoint_strategy = resolve_checkpoint_strategy(configured, &config)?;
        // A plan that starts over reads every range anyway.
        let pending = resumed_from
            .as_ref()
            .filter(|_| config.resume != ResumePoint::Start)
            .map(|cp| cp.pending_ranges.as_slice())
            .unwrap_or_default();
        let tasks = ChunkQueryBuilder::new(dialect)
            .tasks_after_pending(&query, &config, pending)?
            .into_iter()
            .map(|task| task.with_deadline(self.settings.chunk_timeout))
            .collect::<Vec<_>>();
        let replanned = pending.len();

        let execution_mode = if self.settings.parallel_requested()
            && checkpoint_strategy != CheckpointStrategy::RowSkip
            && config.parallel_allowed
            && tasks.len() > 1
        {
            ExecutionMode::Parallel
        } else {
            ExecutionMode::Sequential
        };

        if self.settings.load_mode == LoadMode::Scd2
            && execution_mode == ExecutionMode::Parallel
            && config.strategy != ChunkStrategy::KeyBased
        {
            return Err(EngineError::Configuration(
                "SCD2 loads with parallel workers need key-based chunking so each business key \
                 stays in one chunk"
                    .to_string(),
            ));
        }

        let workers = match execution_mode {
            ExecutionMode::Parallel => self.settings.max_workers.min(tasks.len()),
            ExecutionMode::Sequential => 1,
        };

        let run_id = Uuid::new_v4().to_string();
        info!(
            job_id = %job_id,
            run_id = %run_id,
            strategy = %config.strategy,
            chunks = tasks.len(),
            replanned,
            key_column = ?config.key_column,
            estimated_rows = ?config.estimated_total_rows,
            checkpoint = ?checkpoint_strategy,
            mode = ?execution_mode,
            workers,
            "Planned job"
        );

        Ok(RunPlan {
            run_id,
            fingerprint,
            config,
            tasks,
            replanned,
            checkpoint_strategy,
            execution_mode,
            workers,
            resumed_from,
        })
    }

    pub async fn execute_plan(&self, plan: RunPlan) -> Result<JobResult, EngineError> {
        let job_id = self.job.job_id.as_str();
        let table = &self.job.target.table;

        // Every worker holds one source and one target connection.
        let required = match plan.execution_mode {
            ExecutionMode::Parallel => self.settings.max_workers,
            ExecutionMode::Sequential => 1,
        };
        let sources = SourcePool::new(SourceFactory(self.source.clone()), self.settings.pool_size);
        let targets = TargetPool::new(TargetFactory(self.target.clone()), self.settings.pool_size);
        for check in [sources.ensure_capacity(required), targets.ensure_capacity(required)] {
            check.map_err(|err| EngineError::Configuration(err.to_string()))?;
        }

        if self.settings.load_mode == LoadMode::TruncateLoad {
            if plan.is_fresh_start() {
                let mut conn = targets.acquire().await?;
                conn.truncate(table)
                    .await
                    .map_err(|err| EngineError::Load(SinkError::Db(err)))?;
                info!(job_id, table = %table.name, "Truncated target before load");
            } else {
                info!(job_id, "Resuming a truncate-load run; target left in place");
            }
        }

        let checkpoint_column = match plan.checkpoint_strategy {
            CheckpointStrategy::Key => plan.config.key_column.clone(),
            _ => None,
        };
        let options = ProcessorOptions::new(job_id, &plan.run_id)
            .with_fail_fast(self.settings.fail_fast)
            .with_extract_retry(self.settings.extract_retry_policy())
            .with_checkpoint_column(checkpoint_column.clone());
        let processor = ChunkProcessor::new(table.clone(), self.settings.load_mode, options)
            .with_transforms(self.transforms.clone());

        let metrics = Metrics::new();
        let ctx = Arc::new(WorkerContext {
            processor,
            sources: sources.clone(),
            targets: targets.clone(),
            metrics: metrics.clone(),
        });

        let (base, base_rows) = match &plan.resumed_from {
            Some(cp) if !plan.is_fresh_start() => (cp.cursor.clone(), cp.rows_done),
            _ => (Cursor::None, 0),
        };
        let mut state = RunState {
            job: JobResult::new(job_id, &plan.run_id, plan.execution_mode, plan.tasks.len()),
            tracker: CheckpointTracker::new(plan.checkpoint_strategy, checkpoint_column, base, base_rows)
                .with_tasks(&plan.tasks, plan.replanned),
            metrics,
            fatal: None,
        };

        let cancelled = match plan.execution_mode {
            ExecutionMode::Sequential => self.run_sequential(&plan, &ctx, &mut state).await,
            ExecutionMode::Parallel => self.run_parallel(&plan, &ctx, &mut state).await,
        };

        if let Some(err) = state.fatal.take() {
            error!(job_id, run_id = %plan.run_id, error = %err, "Job aborted");
            sources.close();
            targets.close();
            return Err(err);
        }

        let settled = state.tracker.settle();
        let pending = state.tracker.pending_ranges();
        if state.tracker.is_enabled() && !settled.is_none() {
            let rows_done = state.tracker.rows_done();
            if !pending.is_empty() {
                warn!(job_id, pending = pending.len(), "Chunks below the checkpoint did not commit; the next run reads them again");
            }
            if let Err(err) = self.persist(&plan, settled.clone(), rows_done, pending.clone()).await {
                sources.close();
                targets.close();
                return Err(err);
            }
        }

        let peak = state.metrics.peak_in_flight();
        state.job.finish(settled, peak, cancelled);

        if state.job.is_success()
            && pending.is_empty()
            && self.settings.clear_checkpoint_on_success
            && state.tracker.is_enabled()
        {
            self.store.clear(job_id).await?;
            info!(job_id, "Cleared checkpoint after successful run");
        }

        if let Some(run_log) = &self.run_log
            && let Err(err) = run_log.record_job(&state.job).await
        {
            warn!(job_id, error = %err, "Failed to record job result");
        }

        sources.close();
        targets.close();

        let result = state.job;
        info!(
            job_id,
            run_id = %result.run_id,
            status = %result.status,
            mode = ?result.execution_mode,
            chunks_succeeded = result.chunks_succeeded,
            chunks_failed = result.chunks_failed,
            rows = result.total_rows_processed,
            rows_failed = result.total_rows_failed,
            peak_concurrency = result.peak_concurrency,
            cancelled = result.cancelled,
            "Job finished"
        );
        Ok(result)
    }

    /// Returns whether the run was cancelled before every chunk ran.
    async fn run_sequential(
        &self,
        plan: &RunPlan,
        ctx: &Arc<WorkerContext>,
        state: &mut RunState,
    ) -> bool {
        for task in &plan.tasks {
            if state.fatal.is_some() {
                break;
            }
            if self.cancel.is_cancelled() {
                warn!(job_id = %self.job.job_id, next_chunk = task.chunk_index, "Run cancelled; no further chunks dispatched");
                return true;
            }
            let outcome = run_chunk(ctx.clone(), task.clone()).await;
            self.absorb(plan, state, task, outcome).await;
        }
        false
    }

    async fn run_parallel(
        &self,
        plan: &RunPlan,
        ctx: &Arc<WorkerContext>,
        state: &mut RunState,
    ) -> bool {
        let mut pending = plan.tasks.iter().cloned().peekable();
        let mut in_flight = JoinSet::new();
        let mut cancelled = false;

        loop {
            while in_flight.len() < plan.workers && state.fatal.is_none() && !cancelled {
                let Some(next) = pending.peek() else { break };
                if self.cancel.is_cancelled() {
                    warn!(job_id = %self.job.job_id, next_chunk = next.chunk_index, "Run cancelled; no further chunks dispatched");
                    cancelled = true;
                    break;
                }
                if let Some(task) = pending.next() {
                    in_flight.spawn(run_isolated(ctx.clone(), task));
                }
            }

            match in_flight.join_next().await {
                Some(Ok((task, outcome))) => self.absorb(plan, state, &task, outcome).await,
                Some(Err(err)) => error!(error = %err, "Worker supervisor task failed"),
                None => break,
            }
        }
        cancelled
    }

    async fn absorb(&self, plan: &RunPlan, state: &mut RunState, task: &ChunkTask, outcome: ChunkOutcome) {
        let result = &outcome.result;
        state.job.absorb(task, result);
        state.metrics.increment_rows(result.rows_extracted, result.rows_failed);
        if result.is_committed() {
            state.metrics.increment_committed();
        } else {
            state.metrics.increment_failed();
        }
        if result.attempts > 1 {
            state.metrics.increment_retries(u64::from(result.attempts - 1));
        }

        if !outcome.row_errors.is_empty()
            && let Some(run_log) = &self.run_log
            && let Err(err) = run_log.record_row_errors(&outcome.row_errors).await
        {
            warn!(chunk = task.chunk_index, error = %err, "Failed to record row errors");
        }

        if let Some(cursor) = state.tracker.record(task, result) {
            let rows_done = state.tracker.rows_done();
            let pending = state.tracker.frontier_pending();
            if let Err(err) = self.persist(plan, cursor, rows_done, pending).await {
                error!(chunk = task.chunk_index, error = %err, "Checkpoint write failed; stopping dispatch");
                state.fatal.get_or_insert(err);
            }
        }
    }

    async fn persist(
        &self,
        plan: &RunPlan,
        cursor: Cursor,
        rows_done: u64,
        pending: Vec<PendingRange>,
    ) -> Result<(), EngineError> {
        let checkpoint = Checkpoint::new(&self.job.job_id, plan.checkpoint_strategy, &plan.run_id)
            .with_fingerprint(&plan.fingerprint)
            .with_cursor(cursor, rows_done)
            .with_pending_ranges(pending);
        let saved = self.store.save(&checkpoint).await?;
        debug!(
            job_id = %self.job.job_id,
            cursor = ?checkpoint.cursor,
            rows_done,
            pending = checkpoint.pending_ranges.len(),
            saved,
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn load_checkpoint(&self, fingerprint: &str) -> Result<Option<Checkpoint>, EngineError> {
        if !self.settings.checkpoint_strategy.is_enabled() {
            return Ok(None);
        }
        let job_id = &self.job.job_id;
        let Some(checkpoint) = self.store.load(job_id).await? else {
            return Ok(None);
        };
        if checkpoint.fingerprint != fingerprint {
            warn!(
                job_id = %job_id,
                stored = %checkpoint.fingerprint,
                current = %fingerprint,
                "Job definition changed since the checkpoint was written; starting over"
            );
            return Ok(None);
        }
        if checkpoint.cursor.is_none() {
            return Ok(None);
        }
        info!(
            job_id = %job_id,
            cursor = ?checkpoint.cursor,
            rows_done = checkpoint.rows_done,
            pending = checkpoint.pending_ranges.len(),
            "Resuming from checkpoint"
        );
        Ok(Some(checkpoint))
    }
}

fn resume_point(cursor: &Cursor) -> ResumePoint {
    match cursor {
        Cursor::None => ResumePoint::Start,
        Cursor::Key { value, .. } => ResumePoint::AfterKey(value.clone()),
        Cursor::RowOffset { offset } => ResumePoint::AfterRows(*offset),
    }
}

/// Resolves `Auto` against the plan and rejects a key checkpoint the plan
/// cannot honour.
fn resolve_checkpoint_strategy(
    configured: CheckpointStrategy,
    config: &ChunkConfig,
) -> Result<CheckpointStrategy, EngineError> {
    let keyed = config.strategy == ChunkStrategy::KeyBased && config.key_column.is_some();
    match configured {
        CheckpointStrategy::Key if keyed => Ok(CheckpointStrategy::Key),
        CheckpointStrategy::Key => Err(EngineError::Configuration(
            "KEY checkpoints need key-based chunking, but the source query has no usable key column"
                .to_string(),
        )),
        CheckpointStrategy::Auto if keyed => Ok(CheckpointStrategy::Key),
        CheckpointStrategy::Auto => {
            warn!("No usable key column; checkpointing by row position and running sequentially");
            Ok(CheckpointStrategy::RowSkip)
        }
        other => Ok(other),
    }
}
