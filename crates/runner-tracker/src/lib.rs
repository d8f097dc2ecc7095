//! Local TOML-file `TaskManager`/`StorageBackend` adapter: a stand-in for a
//! real tracker integration (Linear, Jira, GitHub Issues, ...) used for demos
//! and integration tests.

mod format;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;

use format::{TaskToml, TrackerToml};
use runner_core::contracts::{RelationKind, RunContext, StorageBackend, Task, TaskId, TaskManager, TaskRelation, TaskStatus, TaskTree};

pub struct TomlTracker {
    path: PathBuf,
    state: Mutex<TrackerToml>,
}

impl TomlTracker {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let state: TrackerToml = toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn create(path: impl Into<PathBuf>, root: Task) -> Result<Self> {
        let path = path.into();
        let state = TrackerToml {
            root: task_to_toml(&root),
            tasks: Vec::new(),
        };
        let tracker = Self {
            path,
            state: Mutex::new(state),
        };
        tracker.flush()?;
        Ok(tracker)
    }

    fn flush(&self) -> Result<()> {
        let state = self.state.lock().expect("tracker mutex poisoned");
        let body = toml::to_string_pretty(&*state).context("serializing tracker state")?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, body).with_context(|| format!("writing {}", self.path.display()))
    }

    pub fn add_task(&self, task: Task) -> Result<()> {
        {
            let mut state = self.state.lock().expect("tracker mutex poisoned");
            state.tasks.retain(|t| t.id != task.id);
            state.tasks.push(task_to_toml(&task));
        }
        self.flush()
    }
}

fn task_to_toml(task: &Task) -> TaskToml {
    TaskToml {
        id: task.id.clone(),
        title: task.title.clone(),
        description: task.description.clone(),
        status: task.status.to_string(),
        parent_id: task.parent_id.clone(),
        depends_on: task.dependencies(),
        metadata: task.metadata.clone(),
    }
}

fn toml_to_task(raw: &TaskToml) -> Result<Task> {
    let status = TaskStatus::from_str(&raw.status).with_context(|| format!("task {} has invalid status", raw.id))?;
    let mut metadata = raw.metadata.clone();
    if !raw.depends_on.is_empty() {
        metadata
            .entry("dependencies".to_string())
            .or_insert_with(|| raw.depends_on.join(","));
    }
    Ok(Task {
        id: raw.id.clone(),
        title: raw.title.clone(),
        description: raw.description.clone(),
        status,
        parent_id: raw.parent_id.clone(),
        metadata,
    })
}

#[async_trait]
impl TaskManager for TomlTracker {
    async fn next_tasks(&self, _ctx: &RunContext, parent: &TaskId) -> Result<Vec<Task>> {
        let state = self.state.lock().expect("tracker mutex poisoned");
        state
            .tasks
            .iter()
            .filter(|t| t.parent_id.as_deref() == Some(parent.as_str()))
            .map(toml_to_task)
            .collect()
    }

    async fn get_task(&self, _ctx: &RunContext, id: &TaskId) -> Result<Option<Task>> {
        let state = self.state.lock().expect("tracker mutex poisoned");
        if state.root.id == *id {
            return Ok(Some(toml_to_task(&state.root)?));
        }
        state.tasks.iter().find(|t| t.id == *id).map(toml_to_task).transpose()
    }

    async fn set_task_status(&self, _ctx: &RunContext, id: &TaskId, status: TaskStatus) -> Result<()> {
        {
            let mut state = self.state.lock().expect("tracker mutex poisoned");
            if state.root.id == *id {
                state.root.status = status.to_string();
            } else if let Some(task) = state.tasks.iter_mut().find(|t| t.id == *id) {
                task.status = status.to_string();
            } else {
                anyhow::bail!("no such task: {id}");
            }
        }
        self.flush()
    }

    async fn set_task_data(&self, _ctx: &RunContext, id: &TaskId, data: HashMap<String, String>) -> Result<()> {
        {
            let mut state = self.state.lock().expect("tracker mutex poisoned");
            let task = if state.root.id == *id {
                &mut state.root
            } else {
                state
                    .tasks
                    .iter_mut()
                    .find(|t| t.id == *id)
                    .ok_or_else(|| anyhow::anyhow!("no such task: {id}"))?
            };
            task.metadata.extend(data);
        }
        self.flush()
    }
}

#[async_trait]
impl StorageBackend for TomlTracker {
    async fn get_task_tree(&self, _ctx: &RunContext, root: &TaskId) -> Result<TaskTree> {
        let state = self.state.lock().expect("tracker mutex poisoned");
        if state.root.id != *root {
            anyhow::bail!("tracker root is {}, not {root}", state.root.id);
        }
        let root_task = toml_to_task(&state.root)?;
        let mut tasks = HashMap::new();
        let mut relations = Vec::new();
        for raw in &state.tasks {
            let task = toml_to_task(raw)?;
            if let Some(parent_id) = &task.parent_id {
                relations.push(TaskRelation {
                    kind: RelationKind::Parent,
                    from: task.id.clone(),
                    to: parent_id.clone(),
                });
            }
            for dep in task.dependencies() {
                relations.push(TaskRelation {
                    kind: RelationKind::DependsOn,
                    from: task.id.clone(),
                    to: dep,
                });
            }
            tasks.insert(task.id.clone(), task);
        }
        relations.sort_by(|a, b| (a.kind, &a.from, &a.to).cmp(&(b.kind, &b.from, &b.to)));

        Ok(TaskTree {
            root: root_task,
            tasks,
            relations,
        })
    }
}

pub fn default_tracker_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".yolo-runner").join("tracker.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use runner_core::contracts::TaskStatus;

    fn task(id: &str, status: TaskStatus, parent: Option<&str>) -> Task {
        Task {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            status,
            parent_id: parent.map(|s| s.into()),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn round_trips_tasks_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");
        let tracker = TomlTracker::create(&path, task("R", TaskStatus::Open, None)).unwrap();
        tracker.add_task(task("A", TaskStatus::Open, Some("R"))).unwrap();

        let reopened = TomlTracker::open(&path).unwrap();
        let ctx = RunContext::new();
        let tree = reopened.get_task_tree(&ctx, &"R".to_string()).await.unwrap();
        assert_eq!(tree.tasks.len(), 1);
        assert!(tree.tasks.contains_key("A"));
    }

    #[tokio::test]
    async fn set_task_status_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");
        let tracker = TomlTracker::create(&path, task("R", TaskStatus::Open, None)).unwrap();
        tracker.add_task(task("A", TaskStatus::Open, Some("R"))).unwrap();

        let ctx = RunContext::new();
        tracker.set_task_status(&ctx, &"A".to_string(), TaskStatus::Closed).await.unwrap();

        let reopened = TomlTracker::open(&path).unwrap();
        let task = reopened.get_task(&ctx, &"A".to_string()).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Closed);
    }

    #[tokio::test]
    async fn set_task_data_merges_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracker.toml");
        let tracker = TomlTracker::create(&path, task("R", TaskStatus::Open, None)).unwrap();
        tracker.add_task(task("A", TaskStatus::Open, Some("R"))).unwrap();

        let ctx = RunContext::new();
        tracker
            .set_task_data(&ctx, &"A".to_string(), HashMap::from([("triage_status".to_string(), "blocked".to_string())]))
            .await
            .unwrap();

        let task = tracker.get_task(&ctx, &"A".to_string()).await.unwrap().unwrap();
        assert_eq!(task.metadata.get("triage_status").map(String::as_str), Some("blocked"));
    }
}
