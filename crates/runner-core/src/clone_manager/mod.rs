//! Clone Manager: allocates and recycles per-task working copies rooted
//! beneath the repository using `git clone --local`/`rm -rf`, serialized
//! through a mutex so that every dispatch starts from a private `.git` and a
//! runaway agent cannot corrupt the shared object store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::contracts::TaskId;

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("{0} is not a git repository")]
    NotAGitRepo(PathBuf),
    #[error("failed to run git: {0}")]
    GitCommand(#[from] std::io::Error),
    #[error("git exited with status {status}: {stderr}")]
    GitExit { status: i32, stderr: String },
}

pub struct CloneManager {
    repo_root: PathBuf,
    clones_root: PathBuf,
    git_lock: Arc<Mutex<()>>,
}

impl CloneManager {
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        let repo_root = repo_root.into();
        let clones_root = repo_root.join(".yolo-runner").join("clones");
        Self {
            repo_root,
            clones_root,
            git_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn verify_repo(&self) -> Result<(), CloneError> {
        if !self.repo_root.join(".git").exists() {
            return Err(CloneError::NotAGitRepo(self.repo_root.clone()));
        }
        Ok(())
    }

    /// `git clone --local` from the parent repository into a fresh
    /// `<repo>/.yolo-runner/clones/<task_id>-<nonce>/` directory. Reuse is
    /// forbidden: every dispatch starts clean.
    pub async fn acquire(&self, task_id: &TaskId) -> Result<PathBuf, CloneError> {
        let _guard = self.git_lock.lock().await;
        std::fs::create_dir_all(&self.clones_root)?;

        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let target = self.clones_root.join(format!("{task_id}-{nonce}"));

        let output = Command::new("git")
            .arg("clone")
            .arg("--local")
            .arg(&self.repo_root)
            .arg(&target)
            .output()
            .await?;

        if !output.status.success() {
            return Err(CloneError::GitExit {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(target)
    }

    /// Removes the clone directory entirely. Idempotent.
    pub async fn release(&self, clone_path: &Path) -> Result<(), CloneError> {
        let _guard = self.git_lock.lock().await;
        if clone_path.exists() {
            tokio::fs::remove_dir_all(clone_path).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            std::process::Command::new("git")
                .args(args)
                .current_dir(dir)
                .output()
                .expect("git command")
        };
        run(&["init", "-q"]);
        run(&["config", "user.email", "runner@example.com"]);
        run(&["config", "user.name", "runner"]);
        std::fs::write(dir.join("README.md"), "hello").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[tokio::test]
    async fn acquire_then_release_round_trips() {
        let repo_dir = tempfile::tempdir().unwrap();
        init_repo(repo_dir.path());

        let manager = CloneManager::new(repo_dir.path());
        manager.verify_repo().await.unwrap();

        let clone_path = manager.acquire(&"task-a".to_string()).await.unwrap();
        assert!(clone_path.join("README.md").exists());
        assert!(clone_path.join(".git").exists());

        manager.release(&clone_path).await.unwrap();
        assert!(!clone_path.exists());
    }

    #[tokio::test]
    async fn each_acquire_is_a_fresh_clone() {
        let repo_dir = tempfile::tempdir().unwrap();
        init_repo(repo_dir.path());
        let manager = CloneManager::new(repo_dir.path());

        let first = manager.acquire(&"task-a".to_string()).await.unwrap();
        let second = manager.acquire(&"task-a".to_string()).await.unwrap();
        assert_ne!(first, second);
    }
}
