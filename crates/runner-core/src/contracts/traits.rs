use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::context::RunContext;
use super::types::{Event, MergeOutcome, RunnerRequest, RunnerResult, Task, TaskId, TaskStatus, TaskTree};

/// Called by an `AgentRunner` on every meaningful line of subprocess output,
/// before the Watchdog or Event Bus ever see it.
pub type ProgressFn = Box<dyn Fn(&str) + Send + Sync>;

/// Narrow port onto an external task tracker. Implementations own their own
/// wire format; the scheduler never sees it.
#[async_trait]
pub trait TaskManager: Send + Sync {
    async fn next_tasks(&self, ctx: &RunContext, parent: &TaskId) -> Result<Vec<Task>>;
    async fn get_task(&self, ctx: &RunContext, id: &TaskId) -> Result<Option<Task>>;
    async fn set_task_status(&self, ctx: &RunContext, id: &TaskId, status: TaskStatus) -> Result<()>;
    async fn set_task_data(&self, ctx: &RunContext, id: &TaskId, data: HashMap<String, String>) -> Result<()>;
}

/// Wider form of `TaskManager` for backends that can materialize a whole
/// subtree in one call; the Graph Engine depends on this, not `TaskManager`.
#[async_trait]
pub trait StorageBackend: TaskManager {
    async fn get_task_tree(&self, ctx: &RunContext, root: &TaskId) -> Result<TaskTree>;
}

/// Narrow port onto a coding-agent subprocess. Implementations must honor
/// `ctx` cancellation, invoke `on_progress` on meaningful output, and redact
/// secrets before any line reaches `on_progress` or the event stream.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, ctx: &RunContext, request: RunnerRequest, on_progress: ProgressFn) -> Result<RunnerResult>;
    fn capabilities(&self) -> RunnerCapabilities;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunnerCapabilities {
    pub review: bool,
    pub streaming: bool,
}

/// Narrow port onto the version-control backend.
#[async_trait]
pub trait Vcs: Send + Sync {
    async fn ensure_main(&self, repo_root: &Path) -> Result<()>;
    async fn create_task_branch(&self, repo_root: &Path, task_id: &TaskId) -> Result<String>;
    async fn checkout(&self, repo_root: &Path, branch: &str) -> Result<()>;
    /// Fast-forwards the clone's local `main` to `origin/main`. Used before
    /// a merge-conflict retry, since a worker's clone is a point-in-time
    /// snapshot that goes stale once other workers land and push.
    async fn refresh_main(&self, repo_root: &Path) -> Result<()>;
    /// Returns `true` if a commit was made (the tree was dirty).
    async fn commit_all(&self, repo_root: &Path, message: &str) -> Result<bool>;
    async fn merge_to_main(&self, repo_root: &Path, branch: &str) -> Result<MergeOutcome>;
    async fn push_branch(&self, repo_root: &Path, branch: &str) -> Result<()>;
    async fn push_main(&self, repo_root: &Path) -> Result<()>;
}

/// Narrow port onto an event consumer. Composed via a fan-out implementation
/// (`crate::events::fanout`). Sinks are best-effort and never fail the run.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: &Event) -> Result<()>;
}

// Compile-time object-safety assertions: if any of these traits stop being
// object-safe this fails to compile rather than surfacing as a confusing
// error elsewhere.
const _: () = {
    fn _assert_task_manager(_: &dyn TaskManager) {}
    fn _assert_storage_backend(_: &dyn StorageBackend) {}
    fn _assert_agent_runner(_: &dyn AgentRunner) {}
    fn _assert_vcs(_: &dyn Vcs) {}
    fn _assert_event_sink(_: &dyn EventSink) {}
};
