//! Scheduler: owns the worker pool, dispatches frontier tasks, enforces
//! concurrency/attempt/task caps, and drives a graph-driven, journal-backed
//! run over an arbitrary subtree via a semaphore + results-channel +
//! cancellation-aware drain loop.

pub mod journal;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, Semaphore};

use crate::contracts::{Event, EventType, RunContext, StorageBackend, TaskId, TaskStatus};
use crate::events::EventBus;
use crate::graph;
use crate::worker::{Outcome, Worker};
use journal::Journal;

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub parent_id: TaskId,
    pub concurrency: usize,
    /// 0 means unbounded.
    pub max_tasks: u32,
    pub max_attempts_per_task: u32,
    pub state_path: PathBuf,
    pub dry_run: bool,
    pub reset_state: bool,
}

#[derive(Debug, Default)]
pub struct Summary {
    pub closed: usize,
    pub blocked: usize,
    pub cancelled: bool,
}

struct Dispatched {
    task_id: TaskId,
    outcome: Outcome,
}

pub struct Scheduler {
    pub task_manager: Arc<dyn StorageBackend>,
    pub worker: Arc<Worker>,
    pub bus: Arc<EventBus>,
}

impl Scheduler {
    pub async fn run(&self, ctx: &RunContext, options: SchedulerOptions) -> anyhow::Result<Summary> {
        let journal = Journal::new(&options.state_path);
        let mut state = journal.load(options.reset_state)?;

        self.bus
            .publish(
                Event::new(EventType::RunStarted)
                    .with_metadata("root_id", options.parent_id.clone())
                    .with_metadata("concurrency", options.concurrency.to_string()),
            )
            .await;

        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut active: HashMap<TaskId, ()> = HashMap::new();
        let (results_tx, mut results_rx) = mpsc::channel::<Dispatched>(options.concurrency.max(1) * 2);
        let worker_counter = Arc::new(AtomicU64::new(0));

        let mut summary = Summary::default();
        let mut landings_recorded: u32 = 0;
        let mut in_flight = 0usize;

        loop {
            if ctx.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let tree = match self.fetch_tree_with_backoff(ctx, &options.parent_id).await {
                Ok(tree) => tree,
                Err(err) => {
                    anyhow::bail!("failed to refresh task tree: {err}");
                }
            };

            let graph = graph::build_graph(&tree)?;
            for diagnostic in &graph.diagnostics {
                self.bus.publish(diagnostic.clone()).await;
            }

            // Idempotence: reconcile journal-closed tasks the tracker still
            // reports open.
            for task_id in state.closed.clone() {
                if let Some(task) = graph.task(&task_id) {
                    if task.status != TaskStatus::Closed {
                        let _ = self.task_manager.set_task_status(ctx, &task_id, TaskStatus::Closed).await;
                    }
                }
            }

            // Symmetric case: a journal-blocked task the tracker now reports
            // open was explicitly re-opened out-of-band. Its attempt budget
            // resets so it gets a fresh run instead of being immediately
            // re-blocked on the attempts count from its prior exhaustion.
            let mut reopened_any = false;
            for task_id in state.blocked.keys().cloned().collect::<Vec<_>>() {
                if let Some(task) = graph.task(&task_id) {
                    if task.status == TaskStatus::Open {
                        state.blocked.remove(&task_id);
                        state.attempts.remove(&task_id);
                        reopened_any = true;
                    }
                }
            }
            if reopened_any {
                journal.save(&mut state)?;
            }

            if graph::is_complete(&graph) {
                break;
            }

            if options.max_tasks > 0 && landings_recorded >= options.max_tasks {
                break;
            }

            let mut frontier = graph::get_next_available(&graph);
            frontier.retain(|task| !active.contains_key(&task.id) && !state.closed.contains(&task.id));

            for task in frontier {
                if options.dry_run {
                    continue;
                }
                if options.max_tasks > 0 && landings_recorded + (in_flight as u32) >= options.max_tasks {
                    break;
                }
                let attempts = state.attempts.get(&task.id).copied().unwrap_or(0);
                if attempts >= options.max_attempts_per_task {
                    state
                        .blocked
                        .insert(task.id.clone(), "retry_budget_exhausted".into());
                    let _ = self.task_manager.set_task_status(ctx, &task.id, TaskStatus::Blocked).await;
                    journal.save(&mut state)?;
                    continue;
                }

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                active.insert(task.id.clone(), ());
                in_flight += 1;
                state.attempts.insert(task.id.clone(), attempts + 1);

                let worker = self.worker.clone();
                let tx = results_tx.clone();
                let task_id = task.id.clone();
                let task_title = task.title.clone();
                let worker_id = format!("worker-{}", worker_counter.fetch_add(1, Ordering::SeqCst));
                let dispatch_ctx = ctx.child();

                tokio::spawn(async move {
                    let _permit = permit;
                    let outcome = tokio::task::spawn(async move {
                        worker.dispatch(&dispatch_ctx, worker_id, task_id.clone(), task_title).await
                    })
                    .await
                    .unwrap_or_else(|join_err| Outcome::Blocked {
                        reason: format!("internal panic: {join_err}"),
                    });
                    let _ = tx
                        .send(Dispatched {
                            task_id: task.id,
                            outcome,
                        })
                        .await;
                });
            }

            if options.dry_run {
                break;
            }

            if in_flight == 0 {
                // Nothing dispatched this pass and the graph isn't complete:
                // every remaining leaf is blocked on an in-flight dependency
                // elsewhere, or on a cap. Wait briefly and re-check.
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }

            let wait_cancel = ctx.cancelled();
            tokio::select! {
                biased;
                _ = wait_cancel => {
                    summary.cancelled = true;
                }
                maybe_done = results_rx.recv() => {
                    if let Some(done) = maybe_done {
                        in_flight -= 1;
                        active.remove(&done.task_id);
                        match done.outcome {
                            Outcome::Closed => {
                                state.closed.insert(done.task_id.clone());
                                state.attempts.remove(&done.task_id);
                                summary.closed += 1;
                                landings_recorded += 1;
                                let _ = self.task_manager.set_task_status(ctx, &done.task_id, TaskStatus::Closed).await;
                            }
                            Outcome::Failed { .. } => {
                                let _ = self.task_manager.set_task_status(ctx, &done.task_id, TaskStatus::Failed).await;
                                let _ = self.task_manager.set_task_status(ctx, &done.task_id, TaskStatus::Open).await;
                            }
                            Outcome::Blocked { reason } => {
                                state.blocked.insert(done.task_id.clone(), reason);
                                summary.blocked += 1;
                                let _ = self.task_manager.set_task_status(ctx, &done.task_id, TaskStatus::Blocked).await;
                            }
                        }
                        journal.save(&mut state)?;
                    }
                }
            }

            if summary.cancelled {
                break;
            }
        }

        if summary.cancelled {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
            while in_flight > 0 {
                let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match tokio::time::timeout(remaining, results_rx.recv()).await {
                    Ok(Some(done)) => {
                        in_flight -= 1;
                        active.remove(&done.task_id);
                        if let Outcome::Closed = done.outcome {
                            state.closed.insert(done.task_id.clone());
                            summary.closed += 1;
                        }
                    }
                    _ => break,
                }
            }
            journal.save(&mut state)?;
        }

        self.bus
            .publish(
                Event::new(EventType::RunFinished)
                    .with_metadata("closed", summary.closed.to_string())
                    .with_metadata("blocked", summary.blocked.to_string()),
            )
            .await;

        Ok(summary)
    }

    /// Tracker reads retry with capped exponential backoff (3 attempts, 100ms
    /// -> 400ms -> 1600ms, jitter +/-20%) before surfacing the error.
    async fn fetch_tree_with_backoff(
        &self,
        ctx: &RunContext,
        root: &TaskId,
    ) -> anyhow::Result<crate::contracts::TaskTree> {
        let delays_ms = [100u64, 400, 1600];
        let mut last_err = None;
        for (attempt, base_delay) in delays_ms.iter().enumerate() {
            match self.task_manager.get_task_tree(ctx, root).await {
                Ok(tree) => return Ok(tree),
                Err(err) => {
                    last_err = Some(err);
                    if attempt + 1 < delays_ms.len() {
                        let jitter_pct = rand::rng().random_range(-20..=20);
                        let delay_ms = (*base_delay as i64 + (*base_delay as i64 * jitter_pct) / 100).max(0) as u64;
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("tracker read failed")))
    }
}
