//! In-memory fakes of the four contracts, for `runner-core` integration
//! tests: a shared-fixture crate backing pure in-memory state rather than
//! any external database or service.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use runner_core::contracts::{
    AgentRunner, Event, EventSink, MergeOutcome, ProgressFn, RunContext, RunnerCapabilities, RunnerRequest, RunnerResult,
    RunnerStatus, StorageBackend, Task, TaskId, TaskManager, TaskRelation, TaskStatus, TaskTree, Vcs,
};

/// A purely in-memory tracker, seeded with a fixed [`TaskTree`] and mutated
/// as the scheduler issues status/data writes.
pub struct FakeTaskManager {
    tree: Mutex<TaskTree>,
}

impl FakeTaskManager {
    pub fn new(tree: TaskTree) -> Self {
        Self { tree: Mutex::new(tree) }
    }

    pub fn snapshot(&self) -> TaskTree {
        self.tree.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskManager for FakeTaskManager {
    async fn next_tasks(&self, _ctx: &RunContext, parent: &TaskId) -> Result<Vec<Task>> {
        let tree = self.tree.lock().unwrap();
        Ok(tree
            .tasks
            .values()
            .filter(|t| t.parent_id.as_deref() == Some(parent.as_str()))
            .cloned()
            .collect())
    }

    async fn get_task(&self, _ctx: &RunContext, id: &TaskId) -> Result<Option<Task>> {
        let tree = self.tree.lock().unwrap();
        if tree.root.id == *id {
            return Ok(Some(tree.root.clone()));
        }
        Ok(tree.tasks.get(id).cloned())
    }

    async fn set_task_status(&self, _ctx: &RunContext, id: &TaskId, status: TaskStatus) -> Result<()> {
        let mut tree = self.tree.lock().unwrap();
        if tree.root.id == *id {
            tree.root.status = status;
        } else if let Some(task) = tree.tasks.get_mut(id) {
            task.status = status;
        }
        Ok(())
    }

    async fn set_task_data(&self, _ctx: &RunContext, id: &TaskId, data: HashMap<String, String>) -> Result<()> {
        let mut tree = self.tree.lock().unwrap();
        if tree.root.id == *id {
            tree.root.metadata.extend(data);
        } else if let Some(task) = tree.tasks.get_mut(id) {
            task.metadata.extend(data);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FakeTaskManager {
    async fn get_task_tree(&self, _ctx: &RunContext, root: &TaskId) -> Result<TaskTree> {
        let tree = self.tree.lock().unwrap();
        anyhow::ensure!(tree.root.id == *root, "fake tracker root is {}, not {root}", tree.root.id);
        Ok(tree.clone())
    }
}

pub fn single_leaf_tree(root_id: &str, leaf_id: &str) -> TaskTree {
    let root = Task {
        id: root_id.into(),
        title: "root".into(),
        description: String::new(),
        status: TaskStatus::Open,
        parent_id: None,
        metadata: HashMap::new(),
    };
    let leaf = Task {
        id: leaf_id.into(),
        title: leaf_id.into(),
        description: String::new(),
        status: TaskStatus::Open,
        parent_id: Some(root_id.into()),
        metadata: HashMap::new(),
    };
    let relations = vec![TaskRelation {
        kind: runner_core::contracts::RelationKind::Parent,
        from: leaf_id.into(),
        to: root_id.into(),
    }];
    TaskTree {
        root,
        tasks: HashMap::from([(leaf_id.to_string(), leaf)]),
        relations,
    }
}

/// Scripted `AgentRunner`: returns a fixed result per call, optionally
/// sleeping first (to exercise the Watchdog).
pub struct FakeAgentRunner {
    name: String,
    pub result: RunnerResult,
    pub delay: Option<std::time::Duration>,
    caps: RunnerCapabilities,
}

impl FakeAgentRunner {
    pub fn completed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            result: RunnerResult {
                status: RunnerStatus::Completed,
                reason: None,
                review_ready: true,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                log_path: None,
                artifacts: HashMap::new(),
            },
            delay: None,
            caps: RunnerCapabilities {
                review: true,
                streaming: true,
            },
        }
    }

    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_result(mut self, result: RunnerResult) -> Self {
        self.result = result;
        self
    }
}

#[async_trait]
impl AgentRunner for FakeAgentRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &RunContext, request: RunnerRequest, on_progress: ProgressFn) -> Result<RunnerResult> {
        on_progress(&format!("starting {} for {}", self.name, request.task_id));
        if let Some(delay) = self.delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => {}
            }
        }
        Ok(self.result.clone())
    }

    fn capabilities(&self) -> RunnerCapabilities {
        self.caps
    }
}

/// Scripted `Vcs`: records calls and returns a queued sequence of merge
/// outcomes (defaulting to always-land).
pub struct FakeVcs {
    merge_outcomes: Mutex<Vec<MergeOutcome>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeVcs {
    pub fn new(merge_outcomes: Vec<MergeOutcome>) -> Self {
        Self {
            merge_outcomes: Mutex::new(merge_outcomes),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn always_lands() -> Self {
        Self::new(vec![])
    }
}

#[async_trait]
impl Vcs for FakeVcs {
    async fn ensure_main(&self, _repo_root: &Path) -> Result<()> {
        self.calls.lock().unwrap().push("ensure_main".into());
        Ok(())
    }

    async fn create_task_branch(&self, _repo_root: &Path, task_id: &TaskId) -> Result<String> {
        self.calls.lock().unwrap().push("create_task_branch".into());
        Ok(format!("runner/{task_id}"))
    }

    async fn checkout(&self, _repo_root: &Path, _branch: &str) -> Result<()> {
        self.calls.lock().unwrap().push("checkout".into());
        Ok(())
    }

    async fn refresh_main(&self, _repo_root: &Path) -> Result<()> {
        self.calls.lock().unwrap().push("refresh_main".into());
        Ok(())
    }

    async fn commit_all(&self, _repo_root: &Path, _message: &str) -> Result<bool> {
        self.calls.lock().unwrap().push("commit_all".into());
        Ok(true)
    }

    async fn merge_to_main(&self, _repo_root: &Path, _branch: &str) -> Result<MergeOutcome> {
        self.calls.lock().unwrap().push("merge_to_main".into());
        let mut outcomes = self.merge_outcomes.lock().unwrap();
        Ok(if outcomes.is_empty() {
            MergeOutcome::Landed
        } else {
            outcomes.remove(0)
        })
    }

    async fn push_branch(&self, _repo_root: &Path, _branch: &str) -> Result<()> {
        self.calls.lock().unwrap().push("push_branch".into());
        Ok(())
    }

    async fn push_main(&self, _repo_root: &Path) -> Result<()> {
        self.calls.lock().unwrap().push("push_main".into());
        Ok(())
    }
}

/// Records every emitted event for assertions.
#[derive(Default)]
pub struct RecordingEventSink {
    pub events: Mutex<Vec<Event>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit(&self, event: &Event) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn temp_repo_root() -> PathBuf {
    std::env::temp_dir()
}
