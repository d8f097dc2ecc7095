use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type TaskId = String;
pub type WorkerId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Closed,
    Failed,
    Blocked,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid task status: {0}")]
pub struct ParseTaskStatusError(String);

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Closed => "closed",
            TaskStatus::Failed => "failed",
            TaskStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = ParseTaskStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "closed" => Ok(TaskStatus::Closed),
            "failed" => Ok(TaskStatus::Failed),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(ParseTaskStatusError(other.to_string())),
        }
    }
}

impl TaskStatus {
    /// True once a task has left the runnable lifecycle for this run.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Closed | TaskStatus::Failed | TaskStatus::Blocked)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub parent_id: Option<TaskId>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Task {
    /// `metadata["dependencies"]` is a comma-separated list of TaskIDs.
    pub fn dependencies(&self) -> Vec<TaskId> {
        self.metadata
            .get("dependencies")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn priority(&self) -> Option<i64> {
        self.metadata.get("priority").and_then(|v| v.parse().ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Parent,
    DependsOn,
    Blocks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRelation {
    pub kind: RelationKind,
    pub from: TaskId,
    pub to: TaskId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTree {
    pub root: Task,
    pub tasks: HashMap<TaskId, Task>,
    pub relations: Vec<TaskRelation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerMode {
    Implement,
    Review,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerRequest {
    pub task_id: TaskId,
    pub repo_root: String,
    pub prompt: String,
    pub model: String,
    pub mode: RunnerMode,
    /// 0 disables the wall-clock deadline; enforced by the Watchdog, not the runner itself.
    pub timeout_secs: u64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Completed,
    Failed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerResult {
    pub status: RunnerStatus,
    pub reason: Option<String>,
    pub review_ready: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub log_path: Option<String>,
    #[serde(default)]
    pub artifacts: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    TaskStarted,
    CloneAcquired,
    BranchCreated,
    RunnerStarted,
    RunnerOutput,
    RunnerFinished,
    MergeRetry,
    MergeLanded,
    MergeBlocked,
    TaskDataUpdated,
    TaskFinished,
    RunFinished,
    GraphDanglingDep,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventType::RunStarted => "run_started",
            EventType::TaskStarted => "task_started",
            EventType::CloneAcquired => "clone_acquired",
            EventType::BranchCreated => "branch_created",
            EventType::RunnerStarted => "runner_started",
            EventType::RunnerOutput => "runner_output",
            EventType::RunnerFinished => "runner_finished",
            EventType::MergeRetry => "merge_retry",
            EventType::MergeLanded => "merge_landed",
            EventType::MergeBlocked => "merge_blocked",
            EventType::TaskDataUpdated => "task_data_updated",
            EventType::TaskFinished => "task_finished",
            EventType::RunFinished => "run_finished",
            EventType::GraphDanglingDep => "graph_dangling_dep",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<WorkerId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clone_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Event {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            task_id: None,
            task_title: None,
            worker_id: None,
            clone_path: None,
            message: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_task(mut self, task_id: impl Into<TaskId>, task_title: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self.task_title = Some(task_title.into());
        self
    }

    pub fn with_worker(mut self, worker_id: impl Into<WorkerId>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    pub fn with_clone_path(mut self, clone_path: impl Into<String>) -> Self {
        self.clone_path = Some(clone_path.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerState {
    pub version: u32,
    #[serde(default)]
    pub attempts: HashMap<TaskId, u32>,
    #[serde(default)]
    pub closed: std::collections::HashSet<TaskId>,
    #[serde(default)]
    pub blocked: HashMap<TaskId, String>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl SchedulerState {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Landed,
    Conflict,
}
