//! Worker: the per-dispatch pipeline (clone acquire → branch → implement →
//! review → land → tracker status updates), driving two explicit runner
//! invocations — implement then review — rather than a single gated pass.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::clone_manager::CloneManager;
use crate::contracts::{
    Event, EventType, RunContext, RunnerMode, RunnerRegistry, RunnerRequest, RunnerResult, RunnerStatus, TaskId,
    TaskManager, TaskStatus, Vcs, WorkerId,
};
use crate::events::coalescer::Coalescer;
use crate::events::EventBus;
use crate::merge_queue;
use crate::watchdog::{self, WatchdogConfig, WatchdogOutcome};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub backend: String,
    pub model: String,
    pub runner_timeout: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_timeout: Duration,
    pub output_interval: Duration,
    pub verbose_output: bool,
}

/// The deterministic outcome mapping from §4.3: `Closed` lands and closes
/// the task; `Failed` is retriable (the Scheduler checks the attempt
/// budget); `Blocked` is terminal for this run.
#[derive(Debug, Clone)]
pub enum Outcome {
    Closed,
    Failed { reason: String },
    Blocked { reason: String },
}

pub struct Worker {
    pub task_manager: Arc<dyn TaskManager>,
    pub runners: Arc<RunnerRegistry>,
    pub vcs: Arc<dyn Vcs>,
    pub clone_manager: Arc<CloneManager>,
    pub merge_queue: merge_queue::Handle,
    pub bus: Arc<EventBus>,
    pub config: WorkerConfig,
}

impl Worker {
    pub async fn dispatch(&self, ctx: &RunContext, worker_id: WorkerId, task_id: TaskId, task_title: String) -> Outcome {
        let (raw_tx, raw_rx) = mpsc::channel::<Event>(256);
        let (forward_tx, mut forward_rx) = mpsc::channel::<Event>(256);
        let bus = self.bus.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = forward_rx.recv().await {
                bus.publish(event).await;
            }
        });
        let coalescer = Coalescer::new(self.config.output_interval, self.config.verbose_output);
        let coalescer_task = tokio::spawn(coalescer.run(raw_rx, forward_tx));

        let outcome = self.run_pipeline(ctx, &worker_id, &task_id, &task_title, raw_tx.clone()).await;

        drop(raw_tx);
        let _ = coalescer_task.await;
        let _ = forwarder.await;
        outcome
    }

    async fn emit(tx: &mpsc::Sender<Event>, event: Event) {
        let _ = tx.send(event).await;
    }

    async fn run_pipeline(
        &self,
        ctx: &RunContext,
        worker_id: &WorkerId,
        task_id: &TaskId,
        task_title: &str,
        tx: mpsc::Sender<Event>,
    ) -> Outcome {
        Self::emit(
            &tx,
            Event::new(EventType::TaskStarted)
                .with_task(task_id.clone(), task_title)
                .with_worker(worker_id.clone()),
        )
        .await;

        let clone_path = match self.clone_manager.acquire(task_id).await {
            Ok(path) => path,
            Err(err) => {
                return Outcome::Failed {
                    reason: format!("clone acquire failed: {err}"),
                };
            }
        };
        Self::emit(
            &tx,
            Event::new(EventType::CloneAcquired)
                .with_task(task_id.clone(), task_title)
                .with_worker(worker_id.clone())
                .with_clone_path(clone_path.display().to_string()),
        )
        .await;

        let branch = match self.vcs.create_task_branch(&clone_path, task_id).await {
            Ok(b) => b,
            Err(err) => {
                let _ = self.clone_manager.release(&clone_path).await;
                return Outcome::Failed {
                    reason: format!("branch create failed: {err}"),
                };
            }
        };
        Self::emit(
            &tx,
            Event::new(EventType::BranchCreated)
                .with_task(task_id.clone(), task_title)
                .with_worker(worker_id.clone())
                .with_metadata("branch", branch.clone()),
        )
        .await;

        if let Err(err) = self
            .task_manager
            .set_task_status(ctx, task_id, TaskStatus::InProgress)
            .await
        {
            tracing::warn!(error = %err, task_id, "failed to record in_progress status");
        }

        let implement = self
            .run_phase(ctx, worker_id, task_id, task_title, &clone_path, RunnerMode::Implement, &tx)
            .await;

        let implement_result = match implement {
            PhaseOutcome::Result(r) => r,
            PhaseOutcome::Blocked(reason) => {
                let _ = self.clone_manager.release(&clone_path).await;
                return self
                    .finish(&tx, worker_id, task_id, task_title, Outcome::Blocked { reason })
                    .await;
            }
        };

        if !matches!(implement_result.status, RunnerStatus::Completed) {
            let _ = self.clone_manager.release(&clone_path).await;
            let reason = implement_result.reason.unwrap_or_else(|| "runner_failed".into());
            return self
                .finish(&tx, worker_id, task_id, task_title, Outcome::Failed { reason })
                .await;
        }

        let review = self
            .run_phase(ctx, worker_id, task_id, task_title, &clone_path, RunnerMode::Review, &tx)
            .await;

        let review_result = match review {
            PhaseOutcome::Result(r) => r,
            PhaseOutcome::Blocked(reason) => {
                let _ = self.clone_manager.release(&clone_path).await;
                return self
                    .finish(&tx, worker_id, task_id, task_title, Outcome::Blocked { reason })
                    .await;
            }
        };

        if !review_result.review_ready {
            let _ = self.clone_manager.release(&clone_path).await;
            return self
                .finish(
                    &tx,
                    worker_id,
                    task_id,
                    task_title,
                    Outcome::Failed {
                        reason: "review_did_not_pass".into(),
                    },
                )
                .await;
        }

        if let Err(err) = self.vcs.commit_all(&clone_path, &format!("runner: {task_title}")).await {
            let _ = self.clone_manager.release(&clone_path).await;
            return self
                .finish(
                    &tx,
                    worker_id,
                    task_id,
                    task_title,
                    Outcome::Failed {
                        reason: format!("commit failed: {err}"),
                    },
                )
                .await;
        }

        let landing = self.land(ctx, worker_id, task_id, task_title, &clone_path, &branch, &tx).await;
        let _ = self.clone_manager.release(&clone_path).await;
        self.finish(&tx, worker_id, task_id, task_title, landing).await
    }

    async fn run_phase(
        &self,
        ctx: &RunContext,
        worker_id: &WorkerId,
        task_id: &TaskId,
        task_title: &str,
        clone_path: &std::path::Path,
        mode: RunnerMode,
        tx: &mpsc::Sender<Event>,
    ) -> PhaseOutcome {
        let runner = match self.runners.resolve(&self.config.backend, mode == RunnerMode::Review, true) {
            Ok(r) => r,
            Err(err) => return PhaseOutcome::Blocked(format!("runner backend unavailable: {err}")),
        };

        Self::emit(
            tx,
            Event::new(EventType::RunnerStarted)
                .with_task(task_id.clone(), task_title)
                .with_worker(worker_id.clone())
                .with_metadata("mode", format!("{mode:?}").to_lowercase()),
        )
        .await;

        let request = RunnerRequest {
            task_id: task_id.clone(),
            repo_root: clone_path.display().to_string(),
            prompt: format!("{mode:?} task {task_title}"),
            model: self.config.model.clone(),
            mode,
            timeout_secs: self.config.runner_timeout.as_secs(),
            metadata: HashMap::new(),
        };

        let tracker = watchdog::Tracker::new();
        let watchdog_config = WatchdogConfig {
            runner_timeout: self.config.runner_timeout,
            watchdog_interval: self.config.watchdog_interval,
            watchdog_timeout: self.config.watchdog_timeout,
        };

        let progress_tx = tx.clone();
        let progress_task_id = task_id.clone();
        let progress_task_title = task_title.to_string();
        let progress_worker_id = worker_id.clone();
        let progress_tracker = tracker.clone();
        let on_progress: crate::contracts::ProgressFn = Box::new(move |line: &str| {
            progress_tracker.touch();
            let event = Event::new(EventType::RunnerOutput)
                .with_task(progress_task_id.clone(), progress_task_title.clone())
                .with_worker(progress_worker_id.clone())
                .with_message(line.to_string());
            let _ = progress_tx.try_send(event);
        });

        // A child context: the watchdog cancels only this invocation on
        // expiry, not the whole run, while still inheriting cancellation
        // from the parent.
        let runner_ctx = ctx.child();
        let run_fut = runner.run(&runner_ctx, request, on_progress);
        let outcome = watchdog::run_with_watchdog(watchdog_config, tracker, &runner_ctx, run_fut).await;

        let result = match outcome {
            WatchdogOutcome::Finished(Ok(result)) => result,
            WatchdogOutcome::Finished(Err(err)) => {
                return PhaseOutcome::Blocked(format!("runner_failed: {err}"));
            }
            WatchdogOutcome::TimedOut => return PhaseOutcome::Blocked("timeout".into()),
            WatchdogOutcome::NoOutput => return PhaseOutcome::Blocked("no_output".into()),
        };

        Self::emit(
            tx,
            Event::new(EventType::RunnerFinished)
                .with_task(task_id.clone(), task_title)
                .with_worker(worker_id.clone())
                .with_metadata("status", format!("{:?}", result.status).to_lowercase())
                .with_metadata("review_ready", result.review_ready.to_string()),
        )
        .await;

        PhaseOutcome::Result(result)
    }

    async fn land(
        &self,
        ctx: &RunContext,
        worker_id: &WorkerId,
        task_id: &TaskId,
        task_title: &str,
        clone_path: &std::path::Path,
        branch: &str,
        tx: &mpsc::Sender<Event>,
    ) -> Outcome {
        let mut branch = branch.to_string();
        let mut conflict_seen = false;
        loop {
            match self
                .merge_queue
                .submit(clone_path.to_path_buf(), branch.clone(), task_id.clone())
                .await
            {
                Ok(crate::contracts::MergeOutcome::Landed) => {
                    Self::emit(
                        tx,
                        Event::new(EventType::MergeLanded)
                            .with_task(task_id.clone(), task_title)
                            .with_worker(worker_id.clone()),
                    )
                    .await;
                    return Outcome::Closed;
                }
                Ok(crate::contracts::MergeOutcome::Conflict) if !conflict_seen => {
                    conflict_seen = true;
                    Self::emit(
                        tx,
                        Event::new(EventType::MergeRetry)
                            .with_task(task_id.clone(), task_title)
                            .with_worker(worker_id.clone()),
                    )
                    .await;

                    // The worker re-enters: refresh mainline, recreate the
                    // branch from it, and re-run the implement phase before
                    // retrying the merge once.
                    if let Err(err) = self.vcs.refresh_main(clone_path).await {
                        return Outcome::Blocked {
                            reason: format!("refresh_main failed: {err}"),
                        };
                    }
                    branch = match self.vcs.create_task_branch(clone_path, task_id).await {
                        Ok(b) => b,
                        Err(err) => {
                            return Outcome::Blocked {
                                reason: format!("branch recreate failed: {err}"),
                            };
                        }
                    };

                    let implement = self
                        .run_phase(ctx, worker_id, task_id, task_title, clone_path, RunnerMode::Implement, tx)
                        .await;
                    let implement_result = match implement {
                        PhaseOutcome::Result(r) => r,
                        PhaseOutcome::Blocked(reason) => return Outcome::Blocked { reason },
                    };
                    if !matches!(implement_result.status, RunnerStatus::Completed) {
                        let reason = implement_result.reason.unwrap_or_else(|| "runner_failed".into());
                        return Outcome::Failed { reason };
                    }
                    if let Err(err) = self.vcs.commit_all(clone_path, &format!("runner: {task_title}")).await {
                        return Outcome::Blocked {
                            reason: format!("commit failed: {err}"),
                        };
                    }

                    continue;
                }
                Ok(crate::contracts::MergeOutcome::Conflict) => {
                    Self::emit(
                        tx,
                        Event::new(EventType::MergeBlocked)
                            .with_task(task_id.clone(), task_title)
                            .with_worker(worker_id.clone())
                            .with_metadata("triage_reason", "merge_conflict_after_retry"),
                    )
                    .await;
                    return Outcome::Blocked {
                        reason: "merge_conflict_after_retry".into(),
                    };
                }
                Err(err) => {
                    Self::emit(
                        tx,
                        Event::new(EventType::MergeBlocked)
                            .with_task(task_id.clone(), task_title)
                            .with_worker(worker_id.clone())
                            .with_metadata("triage_reason", err.to_string()),
                    )
                    .await;
                    return Outcome::Blocked { reason: err.to_string() };
                }
            }
        }
    }

    async fn finish(
        &self,
        tx: &mpsc::Sender<Event>,
        worker_id: &WorkerId,
        task_id: &TaskId,
        task_title: &str,
        outcome: Outcome,
    ) -> Outcome {
        let (status_str, reason) = match &outcome {
            Outcome::Closed => ("closed".to_string(), None),
            Outcome::Failed { reason } => ("failed".to_string(), Some(reason.clone())),
            Outcome::Blocked { reason } => ("blocked".to_string(), Some(reason.clone())),
        };

        if let Some(reason) = &reason {
            let sanitized: String = reason.chars().filter(|c| !c.is_control() && *c != '|').take(500).collect();
            let _ = self
                .task_manager
                .set_task_data(
                    &RunContext::new(),
                    task_id,
                    HashMap::from([
                        ("triage_status".to_string(), status_str.clone()),
                        ("triage_reason".to_string(), sanitized.clone()),
                    ]),
                )
                .await;
            Self::emit(
                tx,
                Event::new(EventType::TaskDataUpdated)
                    .with_task(task_id.clone(), task_title)
                    .with_worker(worker_id.clone())
                    .with_metadata("triage_status", status_str.clone())
                    .with_metadata("triage_reason", sanitized),
            )
            .await;
        }

        let mut event = Event::new(EventType::TaskFinished)
            .with_task(task_id.clone(), task_title)
            .with_worker(worker_id.clone())
            .with_metadata("status", status_str);
        if let Some(reason) = reason {
            event = event.with_metadata("reason", reason);
        }
        Self::emit(tx, event).await;

        outcome
    }
}

enum PhaseOutcome {
    Result(RunnerResult),
    Blocked(String),
}

pub fn clone_base_dir(repo_root: &std::path::Path) -> PathBuf {
    repo_root.join(".yolo-runner").join("clones")
}
