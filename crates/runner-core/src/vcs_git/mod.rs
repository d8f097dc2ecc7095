//! Example `Vcs` implementation backed by the `git` CLI: branch creation,
//! commit, and a merge step that classifies conflicts from `git merge`'s
//! exit status and aborts cleanly on failure.

use std::path::Path;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::contracts::{MergeOutcome, TaskId, Vcs};

pub struct GitVcs;

impl GitVcs {
    pub fn new() -> Self {
        Self
    }

    async fn run(repo_root: &Path, args: &[&str]) -> Result<std::process::Output> {
        Command::new("git")
            .args(args)
            .current_dir(repo_root)
            .output()
            .await
            .with_context(|| format!("running git {args:?} in {}", repo_root.display()))
    }
}

impl Default for GitVcs {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Vcs for GitVcs {
    async fn ensure_main(&self, repo_root: &Path) -> Result<()> {
        let output = Self::run(repo_root, &["rev-parse", "--verify", "main"]).await?;
        if output.status.success() {
            return Ok(());
        }
        let fallback = Self::run(repo_root, &["rev-parse", "--verify", "master"]).await?;
        if fallback.status.success() {
            return Ok(());
        }
        bail!("repository at {} has neither a main nor a master branch", repo_root.display());
    }

    async fn create_task_branch(&self, repo_root: &Path, task_id: &TaskId) -> Result<String> {
        let branch = format!("runner/{task_id}");
        // -B rather than -b: a merge-conflict retry recreates the same
        // branch name from a refreshed main, which would otherwise fail
        // with "branch already exists".
        let output = Self::run(repo_root, &["checkout", "-B", &branch]).await?;
        if !output.status.success() {
            bail!(
                "git checkout -B {branch} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(branch)
    }

    async fn checkout(&self, repo_root: &Path, branch: &str) -> Result<()> {
        let output = Self::run(repo_root, &["checkout", branch]).await?;
        if !output.status.success() {
            bail!("git checkout {branch} failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    async fn refresh_main(&self, repo_root: &Path) -> Result<()> {
        let fetch = Self::run(repo_root, &["fetch", "origin", "main"]).await?;
        if !fetch.status.success() {
            bail!("git fetch origin main failed: {}", String::from_utf8_lossy(&fetch.stderr));
        }
        let checkout = Self::run(repo_root, &["checkout", "main"]).await?;
        if !checkout.status.success() {
            bail!("git checkout main failed: {}", String::from_utf8_lossy(&checkout.stderr));
        }
        let reset = Self::run(repo_root, &["reset", "--hard", "origin/main"]).await?;
        if !reset.status.success() {
            bail!("git reset --hard origin/main failed: {}", String::from_utf8_lossy(&reset.stderr));
        }
        Ok(())
    }

    async fn commit_all(&self, repo_root: &Path, message: &str) -> Result<bool> {
        Self::run(repo_root, &["add", "-A"]).await?;
        let status = Self::run(repo_root, &["status", "--porcelain"]).await?;
        if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
            return Ok(false);
        }
        let output = Self::run(repo_root, &["commit", "-m", message]).await?;
        if !output.status.success() {
            bail!("git commit failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(true)
    }

    async fn merge_to_main(&self, repo_root: &Path, branch: &str) -> Result<MergeOutcome> {
        Self::run(repo_root, &["checkout", "main"]).await.ok();
        let output = Self::run(repo_root, &["merge", "--no-ff", branch]).await?;
        if output.status.success() {
            return Ok(MergeOutcome::Landed);
        }
        // A non-zero exit from `git merge` after a real attempt is treated as
        // a conflict; abort the half-finished merge so the working tree is
        // left clean for the caller's retry.
        Self::run(repo_root, &["merge", "--abort"]).await.ok();
        Ok(MergeOutcome::Conflict)
    }

    async fn push_branch(&self, repo_root: &Path, branch: &str) -> Result<()> {
        let output = Self::run(repo_root, &["push", "origin", branch]).await?;
        if !output.status.success() {
            bail!("git push origin {branch} failed: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(())
    }

    async fn push_main(&self, repo_root: &Path) -> Result<()> {
        let output = Self::run(repo_root, &["push", "origin", "main"]).await?;
        if !output.status.success() {
            bail!("git push origin main failed: {}", String::from_utf8_lossy(&output.stderr));
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
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "runner@example.com"]);
        run(&["config", "user.name", "runner"]);
        std::fs::write(dir.join("README.md"), "hello").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "init"]);
    }

    #[tokio::test]
    async fn branch_commit_and_merge_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let vcs = GitVcs::new();

        vcs.ensure_main(dir.path()).await.unwrap();
        let branch = vcs.create_task_branch(dir.path(), &"A".to_string()).await.unwrap();
        assert_eq!(branch, "runner/A");

        std::fs::write(dir.path().join("new_file.txt"), "content").unwrap();
        let committed = vcs.commit_all(dir.path(), "implement A").await.unwrap();
        assert!(committed);

        let outcome = vcs.merge_to_main(dir.path(), &branch).await.unwrap();
        assert!(matches!(outcome, MergeOutcome::Landed));
        assert!(dir.path().join("new_file.txt").exists());
    }

    #[tokio::test]
    async fn conflicting_merge_is_classified_and_aborted() {
        let dir = tempfile::tempdir().unwrap();
        init_repo(dir.path());
        let vcs = GitVcs::new();

        let branch = vcs.create_task_branch(dir.path(), &"A".to_string()).await.unwrap();
        std::fs::write(dir.path().join("README.md"), "branch version").unwrap();
        vcs.commit_all(dir.path(), "branch edit").await.unwrap();

        vcs.checkout(dir.path(), "main").await.unwrap();
        std::fs::write(dir.path().join("README.md"), "main version").unwrap();
        vcs.commit_all(dir.path(), "main edit").await.unwrap();

        let outcome = vcs.merge_to_main(dir.path(), &branch).await.unwrap();
        assert!(matches!(outcome, MergeOutcome::Conflict));

        let status = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(dir.path())
            .output()
            .await
            .unwrap();
        assert!(String::from_utf8_lossy(&status.stdout).trim().is_empty());
    }
}
