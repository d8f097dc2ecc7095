//! Merge Queue: a single-writer queue serializing landings onto mainline,
//! run as a single-consumer actor addressed via a channel so that exactly
//! one landing mutates mainline at a time regardless of how many workers
//! are submitting concurrently.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};

use crate::contracts::{MergeOutcome, TaskId, Vcs};

struct Submission {
    repo_root: PathBuf,
    branch: String,
    #[allow(dead_code)]
    task_id: TaskId,
    reply: oneshot::Sender<Result<MergeOutcome>>,
}

/// A single landing attempt's result: the branch either landed (and
/// `PushMain` was attempted best-effort), or hit a conflict the caller must
/// decide how to retry.
pub struct Handle {
    tx: mpsc::Sender<Submission>,
}

impl Handle {
    /// Attempts exactly one `MergeToMain`. On success, also attempts
    /// `PushMain` best-effort (failure is logged by the actor, never
    /// returned — landing on local mainline is authoritative).
    pub async fn submit(&self, repo_root: PathBuf, branch: String, task_id: TaskId) -> Result<MergeOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Submission {
                repo_root,
                branch,
                task_id,
                reply,
            })
            .await
            .map_err(|_| anyhow::anyhow!("merge queue actor is gone"))?;
        rx.await.map_err(|_| anyhow::anyhow!("merge queue actor dropped the reply"))?
    }
}

/// Spawns the single-consumer actor and returns a cloneable [`Handle`] to it.
pub fn spawn(vcs: Arc<dyn Vcs>) -> Handle {
    let (tx, mut rx) = mpsc::channel::<Submission>(32);

    tokio::spawn(async move {
        while let Some(submission) = rx.recv().await {
            let outcome = vcs.merge_to_main(&submission.repo_root, &submission.branch).await;
            let result = match outcome {
                Ok(MergeOutcome::Landed) => {
                    if let Err(err) = vcs.push_main(&submission.repo_root).await {
                        tracing::warn!(error = %err, "push_main failed; landing remains authoritative locally");
                    }
                    Ok(MergeOutcome::Landed)
                }
                other => other,
            };
            let _ = submission.reply.send(result);
        }
    });

    Handle { tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyVcs {
        conflicts_remaining: AtomicUsize,
        landings_seen: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Vcs for FlakyVcs {
        async fn ensure_main(&self, _repo_root: &Path) -> Result<()> {
            Ok(())
        }
        async fn create_task_branch(&self, _repo_root: &Path, _task_id: &TaskId) -> Result<String> {
            Ok("branch".into())
        }
        async fn checkout(&self, _repo_root: &Path, _branch: &str) -> Result<()> {
            Ok(())
        }
        async fn refresh_main(&self, _repo_root: &Path) -> Result<()> {
            Ok(())
        }
        async fn commit_all(&self, _repo_root: &Path, _message: &str) -> Result<bool> {
            Ok(true)
        }
        async fn merge_to_main(&self, _repo_root: &Path, branch: &str) -> Result<MergeOutcome> {
            if self.conflicts_remaining.load(Ordering::SeqCst) > 0 {
                self.conflicts_remaining.fetch_sub(1, Ordering::SeqCst);
                return Ok(MergeOutcome::Conflict);
            }
            self.landings_seen.lock().unwrap().push(branch.to_string());
            Ok(MergeOutcome::Landed)
        }
        async fn push_branch(&self, _repo_root: &Path, _branch: &str) -> Result<()> {
            Ok(())
        }
        async fn push_main(&self, _repo_root: &Path) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn conflict_then_success_on_retry() {
        let landings = Arc::new(std::sync::Mutex::new(Vec::new()));
        let vcs = Arc::new(FlakyVcs {
            conflicts_remaining: AtomicUsize::new(1),
            landings_seen: landings.clone(),
        });
        let handle = spawn(vcs);

        let first = handle
            .submit(PathBuf::from("/tmp/repo"), "task-a".into(), "A".into())
            .await
            .unwrap();
        assert!(matches!(first, MergeOutcome::Conflict));

        let second = handle
            .submit(PathBuf::from("/tmp/repo"), "task-a".into(), "A".into())
            .await
            .unwrap();
        assert!(matches!(second, MergeOutcome::Landed));
        assert_eq!(landings.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn landings_are_strictly_serialized() {
        let landings = Arc::new(std::sync::Mutex::new(Vec::new()));
        let vcs = Arc::new(FlakyVcs {
            conflicts_remaining: AtomicUsize::new(0),
            landings_seen: landings.clone(),
        });
        let handle = spawn(vcs);

        let h1 = handle.clone_for_test();
        let h2 = handle.clone_for_test();
        let (r1, r2) = tokio::join!(
            h1.submit(PathBuf::from("/tmp/repo"), "task-a".into(), "A".into()),
            h2.submit(PathBuf::from("/tmp/repo"), "task-b".into(), "B".into())
        );
        assert!(matches!(r1.unwrap(), MergeOutcome::Landed));
        assert!(matches!(r2.unwrap(), MergeOutcome::Landed));
        assert_eq!(landings.lock().unwrap().len(), 2);
    }

    impl Handle {
        fn clone_for_test(&self) -> Handle {
            Handle { tx: self.tx.clone() }
        }
    }
}
