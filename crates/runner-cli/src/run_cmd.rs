//! `yolo-runner run` / `yolo-runner resume`: wire up the four contract
//! backends and drive the Scheduler to completion or interruption. Ctrl+C
//! cancels gracefully on the first signal and force-exits on the second.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};

use runner_core::clone_manager::CloneManager;
use runner_core::contracts::{RunContext, RunnerRegistry, Vcs};
use runner_core::events::sinks::{default_event_log_path, default_journal_dir, FileSink, MirrorSink, StreamSink};
use runner_core::events::{Backpressure, EventBus};
use runner_core::merge_queue;
use runner_core::runners::subprocess::SubprocessRunner;
use runner_core::scheduler::{Scheduler, SchedulerOptions, Summary};
use runner_core::vcs_git::GitVcs;
use runner_core::worker::{Worker, WorkerConfig};
use runner_tracker::TomlTracker;

use crate::config::{RunnerConfig, RunnerOverrides};

pub struct RunArgs {
    pub root: String,
    pub repo: PathBuf,
    pub tracker: Option<PathBuf>,
    pub state: Option<PathBuf>,
    pub max_tasks: u32,
    pub dry_run: bool,
    pub reset_state: bool,
    pub stream: bool,
    pub file_log: Option<PathBuf>,
    pub verbose_stream: bool,
    pub mirror: bool,
    pub overrides: RunnerOverrides,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let config = RunnerConfig::resolve(&args.overrides)?;

    let repo_root = args.repo.canonicalize().with_context(|| format!("resolving repo root {}", args.repo.display()))?;
    let tracker_path = args.tracker.unwrap_or_else(|| runner_tracker::default_tracker_path(&repo_root));
    let state_path = args.state.unwrap_or_else(|| default_journal_dir(&repo_root).join("state.json"));

    println!("yolo-runner run: root={} repo={}", args.root, repo_root.display());
    println!("  concurrency={} backend={} model={}", config.concurrency, config.backend, config.model);
    println!("  tracker={} state={}", tracker_path.display(), state_path.display());

    let tracker = Arc::new(TomlTracker::open(&tracker_path).with_context(|| format!("opening tracker at {}", tracker_path.display()))?);

    let clone_manager = Arc::new(CloneManager::new(&repo_root));
    clone_manager.verify_repo().await.context("repo root is not a git repository")?;

    let vcs = Arc::new(GitVcs::new());
    vcs.ensure_main(&repo_root).await.context("verifying main branch")?;

    let mut registry = RunnerRegistry::new();
    registry.register(Box::new(SubprocessRunner::new(config.backend.clone(), config.binary_path.clone(), Vec::new())));
    let registry = Arc::new(registry);

    let mut bus = EventBus::new();
    let no_explicit_file_log = args.file_log.is_none();
    let file_log_path = args.file_log.unwrap_or_else(|| default_event_log_path(&repo_root));
    let file_sink = Box::new(FileSink::open(&file_log_path).context("opening event log file")?);
    if args.mirror {
        // Stream is primary; the file write happens on MirrorSink's own
        // background task so a slow disk never backs up stdout.
        bus.register(Box::new(MirrorSink::new(Box::new(StreamSink), file_sink, 64)), Backpressure::Drop, 64);
    } else {
        if args.stream || no_explicit_file_log {
            bus.register(Box::new(StreamSink), Backpressure::Drop, 64);
        }
        bus.register(file_sink, Backpressure::Block, 64);
    }
    let bus = Arc::new(bus);

    let merge_handle = merge_queue::spawn(vcs.clone());

    let worker = Arc::new(Worker {
        task_manager: tracker.clone(),
        runners: registry,
        vcs,
        clone_manager,
        merge_queue: merge_handle,
        bus: bus.clone(),
        config: WorkerConfig {
            backend: config.backend.clone(),
            model: config.model.clone(),
            runner_timeout: config.runner_timeout,
            watchdog_interval: config.watchdog_interval,
            watchdog_timeout: config.watchdog_timeout,
            output_interval: config.output_interval,
            verbose_output: args.verbose_stream,
        },
    });

    let scheduler = Scheduler {
        task_manager: tracker,
        worker,
        bus,
    };

    // Set up graceful shutdown: first signal cancels, second force-exits.
    let ctx = RunContext::new();
    let ctx_clone = ctx.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_clone = Arc::clone(&got_first_signal);
    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_clone.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down gracefully (Ctrl+C again to force)...");
            ctx_clone.cancel();
        }
    });

    let options = SchedulerOptions {
        parent_id: args.root,
        concurrency: config.concurrency,
        max_tasks: args.max_tasks,
        max_attempts_per_task: config.max_attempts_per_task,
        state_path,
        dry_run: args.dry_run,
        reset_state: args.reset_state,
    };

    let summary = scheduler.run(&ctx, options).await?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &Summary) {
    println!();
    println!("Run finished: closed={} blocked={} cancelled={}", summary.closed, summary.blocked, summary.cancelled);
}
