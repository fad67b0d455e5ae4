use crate::error::CliError;
use engine_runtime::RunPlan;
use model::{
    chunk::{
        config::ChunkConfig,
        result::{ExecutionMode, JobResult},
        task::ChunkTask,
    },
    execution::load::CheckpointStrategy,
    pagination::{checkpoint::Checkpoint, cursor::Cursor},
};
use serde::Serialize;

#[derive(Serialize)]
struct PlanReport<'a> {
    job_id: &'a str,
    config: &'a ChunkConfig,
    checkpoint_strategy: CheckpointStrategy,
    execution_mode: ExecutionMode,
    workers: usize,
    resumed_from: Option<&'a Checkpoint>,
    tasks: &'a [ChunkTask],
}

pub fn print_plan(job_id: &str, plan: &RunPlan, as_json: bool) -> Result<(), CliError> {
    if as_json {
        let report = PlanReport {
            job_id,
            config: &plan.config,
            checkpoint_strategy: plan.checkpoint_strategy,
            execution_mode: plan.execution_mode,
            workers: plan.workers,
            resumed_from: plan.resumed_from.as_ref(),
            tasks: &plan.tasks,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let config = &plan.config;
    println!("Plan for job '{job_id}':");
    println!("-----------------------------");
    println!("{:<16} {}", "Strategy", config.strategy);
    println!("{:<16} {}", "Key column", config.key_column.as_deref().unwrap_or("-"));
    println!("{:<16} {}", "Chunk size", config.chunk_size);
    let estimate = config
        .estimated_total_rows
        .map(|n| n.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    println!("{:<16} {}", "Estimated rows", estimate);
    println!("{:<16} {:?}", "Checkpoint", plan.checkpoint_strategy);
    println!("{:<16} {:?} ({} workers)", "Execution", plan.execution_mode, plan.workers);
    if let Some(checkpoint) = &plan.resumed_from {
        println!("{:<16} {}", "Resuming from", cursor_text(&checkpoint.cursor));
    }
    if plan.replanned > 0 {
        println!("{:<16} {} pending range(s) read first", "Re-planned", plan.replanned);
    }
    for task in &plan.tasks {
        println!();
        println!("-- chunk {} ({} .. {})", task.chunk_index, task.lower_bound, task.upper_bound);
        println!("{}", task.sql);
    }
    Ok(())
}

pub fn print_job_result(result: &JobResult) {
    println!("Job '{}' finished: {}", result.job_id, result.status);
    println!("-----------------------------");
    println!("{:<16} {}", "Run", result.run_id);
    println!("{:<16} {:?}", "Execution", result.execution_mode);
    println!(
        "{:<16} {}/{} committed",
        "Chunks", result.chunks_succeeded, result.chunks_total
    );
    println!("{:<16} {}", "Rows read", result.total_rows_processed);
    println!(
        "{:<16} {} new, {} changed, {} unchanged",
        "Rows loaded", result.rows_new, result.rows_changed, result.rows_unchanged
    );
    println!("{:<16} {}", "Rows failed", result.total_rows_failed);
    println!("{:<16} {}", "Checkpoint", cursor_text(&result.checkpoint_value));
    println!("{:<16} {}", "Peak workers", result.peak_concurrency);
    if result.cancelled {
        println!("{:<16} yes", "Cancelled");
    }
    for chunk in &result.failed_chunks {
        println!(
            "  chunk {} ({} .. {}) failed: {}",
            chunk.chunk_index, chunk.lower_bound, chunk.upper_bound, chunk.error
        );
    }
}

pub fn print_checkpoint(
    job_id: &str,
    checkpoint: Option<&Checkpoint>,
    as_json: bool,
) -> Result<(), CliError> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }
    let Some(checkpoint) = checkpoint else {
        println!("No checkpoint stored for job '{job_id}'");
        return Ok(());
    };
    println!("Checkpoint for job '{job_id}':");
    println!("-----------------------------");
    println!("{:<16} {:?}", "Strategy", checkpoint.strategy);
    println!("{:<16} {}", "Position", cursor_text(&checkpoint.cursor));
    println!("{:<16} {}", "Rows done", checkpoint.rows_done);
    for range in &checkpoint.pending_ranges {
        println!("{:<16} {} .. {}", "Pending", range.lower, range.upper);
    }
    println!("{:<16} {}", "Run", checkpoint.run_id);
    println!("{:<16} {}", "Fingerprint", checkpoint.fingerprint);
    println!("{:<16} {}", "Updated", checkpoint.updated_at.to_rfc3339());
    Ok(())
}

fn cursor_text(cursor: &Cursor) -> String {
    match cursor {
        Cursor::None => "n/a".to_string(),
        Cursor::Key { column, value } => format!("{column} > {value}"),
        Cursor::RowOffset { offset } => format!("after row {offset}"),
    }
}
