mod config;
mod log_cmd;
mod run_cmd;
mod status_cmd;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::RunnerOverrides;
use run_cmd::RunArgs;

#[derive(Parser)]
#[command(name = "yolo-runner", about = "Concurrent runner for fleets of autonomous coding agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task subtree to completion or interruption.
    Run(RunFlags),
    /// Print a summary of the last journaled scheduler state.
    Status {
        /// Path to the state journal file.
        #[arg(long)]
        state: PathBuf,
    },
    /// Print the recorded event-log lines for one task.
    Log {
        /// Path to the repository root (used to locate the default event log).
        #[arg(long)]
        repo: PathBuf,
        /// Task ID to show events for.
        #[arg(long)]
        task: String,
        /// Override the event log file path.
        #[arg(long)]
        file_log: Option<PathBuf>,
    },
    /// Re-run `run`, loading existing journal state (or discarding it first).
    Resume {
        #[command(flatten)]
        flags: RunFlags,
        /// Discard the existing journal instead of resuming from it.
        #[arg(long)]
        reset_state: bool,
    },
}

#[derive(clap::Args)]
struct RunFlags {
    /// Root task ID to drive to completion.
    #[arg(long)]
    root: String,
    /// Path to the git repository the scheduler clones from.
    #[arg(long)]
    repo: PathBuf,
    /// Path to the local tracker TOML file (defaults to `<repo>/.yolo-runner/tracker.toml`).
    #[arg(long)]
    tracker: Option<PathBuf>,
    /// Path to the state journal file (defaults to `<repo>/.yolo-runner/state.json`).
    #[arg(long)]
    state: Option<PathBuf>,
    /// Maximum number of tasks to close in this run. 0 means unbounded.
    #[arg(long, default_value_t = 0)]
    max_tasks: u32,
    /// Compute the frontier and print it without dispatching any workers.
    #[arg(long)]
    dry_run: bool,
    /// Stream every event to stdout as NDJSON.
    #[arg(long)]
    stream: bool,
    /// Append every event to this JSONL file instead of the default location.
    #[arg(long)]
    file_log: Option<PathBuf>,
    /// Pass every runner_output event through uncoalesced.
    #[arg(long)]
    verbose_stream: bool,
    /// Couple the file log behind a bounded buffer to the stream sink
    /// instead of registering them independently, so a slow disk never
    /// backs up stdout.
    #[arg(long)]
    mirror: bool,
    #[arg(long)]
    concurrency: Option<usize>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    backend: Option<String>,
    #[arg(long)]
    binary_path: Option<String>,
    #[arg(long)]
    runner_timeout_secs: Option<u64>,
    #[arg(long)]
    max_attempts_per_task: Option<u32>,
}

impl RunFlags {
    fn into_run_args(self, reset_state: bool) -> RunArgs {
        RunArgs {
            root: self.root,
            repo: self.repo,
            tracker: self.tracker,
            state: self.state,
            max_tasks: self.max_tasks,
            dry_run: self.dry_run,
            reset_state,
            stream: self.stream,
            file_log: self.file_log,
            verbose_stream: self.verbose_stream,
            mirror: self.mirror,
            overrides: RunnerOverrides {
                concurrency: self.concurrency,
                model: self.model,
                backend: self.backend,
                binary_path: self.binary_path,
                runner_timeout_secs: self.runner_timeout_secs,
                watchdog_interval_secs: None,
                watchdog_timeout_secs: None,
                output_interval_secs: None,
                max_attempts_per_task: self.max_attempts_per_task,
            },
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(flags) => {
            run_cmd::run(flags.into_run_args(false)).await?;
        }
        Commands::Resume { flags, reset_state } => {
            run_cmd::run(flags.into_run_args(reset_state)).await?;
        }
        Commands::Status { state } => {
            status_cmd::run_status(&state)?;
        }
        Commands::Log { repo, task, file_log } => {
            let repo_root = repo.canonicalize().unwrap_or(repo);
            let path = file_log.unwrap_or_else(|| runner_core::events::sinks::default_event_log_path(&repo_root));
            log_cmd::run_log(&path, &task)?;
        }
    }

    Ok(())
}
