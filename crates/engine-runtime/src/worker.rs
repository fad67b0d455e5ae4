use engine_core::{
    error::PoolError,
    metrics::Metrics,
    pool::{SourcePool, TargetPool},
};
use engine_processing::{
    chunk::{ChunkOutcome, ChunkProcessor},
    error::ChunkError,
};
use model::chunk::{result::ChunkResult, task::ChunkTask};
use std::sync::Arc;
use tracing::{debug, error};

/// Everything a worker needs to run a chunk. Shared read-only by all workers
/// of a run.
pub struct WorkerContext {
    pub processor: ChunkProcessor,
    pub sources: Arc<SourcePool>,
    pub targets: Arc<TargetPool>,
    pub metrics: Metrics,
}

fn unstarted(task: &ChunkTask, err: ChunkError) -> ChunkOutcome {
    ChunkOutcome {
        result: ChunkResult::failed(task.chunk_index, 0, err.to_string(), 0, 0),
        row_errors: Vec::new(),
        error: Some(err),
        source_broken: false,
        target_broken: false,
    }
}

fn pool_failure(task: &ChunkTask, err: PoolError) -> ChunkOutcome {
    error!(chunk = task.chunk_index, error = %err, "Could not acquire a connection");
    unstarted(task, ChunkError::Pool(err))
}

/// Runs one chunk on its own pair of pooled connections. Broken connections
/// are discarded instead of returned to the pool.
pub async fn run_chunk(ctx: Arc<WorkerContext>, task: ChunkTask) -> ChunkOutcome {
    let _in_flight = ctx.metrics.chunk_started();

    let mut source = match ctx.sources.acquire().await {
        Ok(conn) => conn,
        Err(err) => return pool_failure(&task, err),
    };
    let mut target = match ctx.targets.acquire().await {
        Ok(conn) => conn,
        Err(err) => return pool_failure(&task, err),
    };
    debug!(chunk = task.chunk_index, lower = %task.lower_bound, upper = %task.upper_bound, "Worker picked up chunk");

    let outcome = ctx
        .processor
        .process(&task, &**source, &mut **target)
        .await;

    if outcome.source_broken {
        source.mark_broken();
    }
    if outcome.target_broken {
        target.mark_broken();
    }
    outcome
}

/// Runs the chunk on its own task so a panic fails only this chunk.
pub async fn run_isolated(ctx: Arc<WorkerContext>, task: ChunkTask) -> (ChunkTask, ChunkOutcome) {
    let handle = tokio::spawn(run_chunk(ctx, task.clone()));
    match handle.await {
        Ok(outcome) => (task, outcome),
        Err(join_err) => {
            error!(chunk = task.chunk_index, error = %join_err, "Worker task aborted");
            let outcome = ChunkOutcome {
                result: ChunkResult::failed(
                    task.chunk_index,
                    0,
                    format!("worker task aborted: {join_err}"),
                    0,
                    0,
                ),
                row_errors: Vec::new(),
                error: None,
                source_broken: true,
                target_broken: true,
            };
            (task, outcome)
        }
    }
}
