use crate::{
    commands::{CheckpointCommand, Commands},
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use connectors::sql::postgres::{PgSourceConnector, PgTargetConnector};
use engine_config::job::JobSpec;
use engine_processing::transform::TransformPipeline;
use engine_core::{
    runlog::JsonlRunLog,
    state::{CheckpointStore, SledCheckpointStore},
};
use engine_runtime::ParallelProcessor;
use model::chunk::result::JobStatus;
use planner::query::dialect::DialectKind;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod conn;
mod env;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "chunkflow", version = "0.1.0", about = "Chunked parallel ETL engine")]
struct Cli {
    /// Directory holding checkpoints and run logs (default: ~/.chunkflow/state)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let code = match dispatch(cli, &shutdown).await {
        Ok(code) => code,
        Err(CliError::ShutdownRequested) => ExitCode::ShutdownRequested,
        Err(err) => {
            error!(error = %err, "chunkflow failed");
            eprintln!("error: {err}");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

async fn dispatch(cli: Cli, shutdown: &ShutdownCoordinator) -> Result<ExitCode, CliError> {
    let state_dir = resolve_state_dir(cli.state_dir)?;

    match cli.command {
        Commands::Run { job, env_file } => {
            let job = load_job(&job, env_file.as_deref())?;
            let processor =
                build_processor(job, &state_dir)?.with_cancellation(shutdown.cancel_token());
            let result = processor.execute().await?;
            output::print_job_result(&result);

            if shutdown.is_shutdown_requested() || result.cancelled {
                return Err(CliError::ShutdownRequested);
            }
            Ok(match result.status {
                JobStatus::Success => ExitCode::Success,
                JobStatus::Partial => ExitCode::Partial,
                JobStatus::Failed => ExitCode::GeneralError,
            })
        }
        Commands::Plan {
            job,
            env_file,
            json,
        } => {
            let job = load_job(&job, env_file.as_deref())?;
            let job_id = job.job_id.clone();
            let plan = build_processor(job, &state_dir)?.plan().await?;
            output::print_plan(&job_id, &plan, json)?;
            Ok(ExitCode::Success)
        }
        Commands::Checkpoint { command } => {
            let store = open_checkpoint_store(&state_dir)?;
            match command {
                CheckpointCommand::Show { job_id, json } => {
                    let checkpoint = store.load(&job_id).await?;
                    output::print_checkpoint(&job_id, checkpoint.as_ref(), json)?;
                }
                CheckpointCommand::Clear { job_id } => {
                    store.clear(&job_id).await?;
                    info!(job_id = %job_id, "Checkpoint cleared");
                }
            }
            Ok(ExitCode::Success)
        }
        Commands::TestConn { job, env_file } => {
            let job = load_job(&job, env_file.as_deref())?;
            let (source, target) = job_connectors(&job)?;
            conn::check_connections(&source, &target).await?;
            Ok(ExitCode::Success)
        }
    }
}

fn resolve_state_dir(explicit: Option<PathBuf>) -> Result<PathBuf, CliError> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let home = dirs::home_dir()
        .ok_or_else(|| CliError::Unexpected("Could not determine home directory".into()))?;
    Ok(home.join(".chunkflow/state"))
}

fn open_checkpoint_store(state_dir: &Path) -> Result<SledCheckpointStore, CliError> {
    let path = state_dir.join("checkpoints");
    SledCheckpointStore::open(&path).map_err(|err| {
        CliError::Unexpected(format!(
            "Failed to open checkpoint store at {}: {err}",
            path.display()
        ))
    })
}

fn load_job(path: &Path, env_file: Option<&Path>) -> Result<JobSpec, CliError> {
    let mut env = EnvManager::from_process();
    if let Some(file) = env_file {
        env.load_from_file(file)?;
    }
    let mut job = JobSpec::from_file(path)?;
    let overrides = env.override_names();
    if !overrides.is_empty() {
        info!(vars = ?overrides, "Applying environment overrides");
    }
    job.apply_env(env.all())?;
    Ok(job)
}

fn job_connectors(job: &JobSpec) -> Result<(PgSourceConnector, PgTargetConnector), CliError> {
    if job.source.dialect != DialectKind::Postgres {
        return Err(CliError::UnsupportedDialect(format!("{:?}", job.source.dialect)));
    }
    let source = PgSourceConnector::new(job.source_url()?, &job.target.table.name);
    let target = PgTargetConnector::new(job.target_url()?);
    Ok((source, target))
}

fn build_processor(job: JobSpec, state_dir: &Path) -> Result<ParallelProcessor, CliError> {
    let (source, target) = job_connectors(&job)?;
    let settings = job.validate()?;
    let transforms = TransformPipeline::from_specs(&job.transforms);
    if !transforms.is_empty() {
        info!(count = transforms.len(), "Row transforms configured");
    }
    let store = open_checkpoint_store(state_dir)?;

    Ok(ParallelProcessor::new(
        job,
        settings,
        Arc::new(source),
        Arc::new(target),
        Arc::new(store),
    )
    .with_transforms(transforms)
    .with_run_log(Arc::new(JsonlRunLog::new(state_dir))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_state_dir_override_wins() {
        let dir = resolve_state_dir(Some(PathBuf::from("/tmp/cf"))).unwrap();
        assert_eq!(dir, PathBuf::from("/tmp/cf"));
    }

    #[test]
    fn test_parses_checkpoint_show() {
        let cli = Cli::try_parse_from([
            "chunkflow",
            "--state-dir",
            "/tmp/cf",
            "checkpoint",
            "show",
            "--job-id",
            "txns",
            "--json",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Checkpoint {
                command: CheckpointCommand::Show { ref job_id, json: true }
            } if job_id == "txns"
        ));
    }

    #[test]
    fn test_checkpoint_store_opens_under_state_dir() {
        let dir = tempfile::tempdir().unwrap();
        open_checkpoint_store(dir.path()).unwrap();
        assert!(dir.path().join("checkpoints").exists());
    }

    #[test]
    fn test_parses_test_conn_with_job_file() {
        let cli =
            Cli::try_parse_from(["chunkflow", "test-conn", "--job", "jobs/orders.json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::TestConn { ref job, env_file: None } if job == Path::new("jobs/orders.json")
        ));
    }

    #[test]
    fn test_job_with_transforms_builds_a_processor() {
        let job = JobSpec::from_json(
            r#"{
                "job_id": "j",
                "source": { "dialect": "postgres", "url": "postgres://x", "query": "SELECT * FROM t ORDER BY id" },
                "target": { "url": "postgres://y", "table": { "name": "t", "business_key": ["id"] } },
                "transforms": [{ "drop": ["ssn"] }, { "set_entity": "t" }]
            }"#,
        )
        .unwrap();
        assert_eq!(TransformPipeline::from_specs(&job.transforms).len(), 2);
        let dir = tempfile::tempdir().unwrap();
        assert!(build_processor(job, dir.path()).is_ok());
    }

    #[test]
    fn test_only_postgres_sources_are_runnable() {
        let job = JobSpec::from_json(
            r#"{
                "job_id": "j",
                "source": { "dialect": "mysql", "url": "mysql://x", "query": "SELECT 1" },
                "target": { "url": "postgres://y", "table": { "name": "t" } }
            }"#,
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            build_processor(job, dir.path()),
            Err(CliError::UnsupportedDialect(_))
        ));
    }
}
