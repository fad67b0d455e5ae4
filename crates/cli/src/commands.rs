use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a job, resuming from its checkpoint when one exists
    Run {
        #[arg(long, help = "Job file path")]
        job: PathBuf,

        #[arg(long, help = "Load extra environment variables from this .env file")]
        env_file: Option<PathBuf>,
    },
    /// Print the chunk plan and per-chunk SQL without moving any rows
    Plan {
        #[arg(long, help = "Job file path")]
        job: PathBuf,

        #[arg(long, help = "Load extra environment variables from this .env file")]
        env_file: Option<PathBuf>,

        #[arg(long, help = "Print the plan as JSON instead of text")]
        json: bool,
    },
    Checkpoint {
        #[command(subcommand)]
        command: CheckpointCommand,
    },
    /// Open one connection to the job's source and target
    TestConn {
        #[arg(long, help = "Job file path")]
        job: PathBuf,

        #[arg(long, help = "Load extra environment variables from this .env file")]
        env_file: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum CheckpointCommand {
    Show {
        #[arg(long, help = "Job ID to inspect")]
        job_id: String,

        #[arg(long, help = "Print the checkpoint as JSON instead of a table")]
        json: bool,
    },
    Clear {
        #[arg(long, help = "Job ID whose checkpoint is removed")]
        job_id: String,
    },
}
