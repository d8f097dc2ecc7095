use thiserror::Error;

/// Kinds the Scheduler and Worker must match on to decide retry vs. escalate
/// vs. abort. Most other failures stay opaque `anyhow::Error` with `.context(..)`.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("tracker read failed after retries: {0}")]
    TransientTracker(String),

    #[error("runner invocation timed out")]
    RunnerTimeout,

    #[error("runner invocation produced no output for longer than the watchdog allows")]
    RunnerNoOutput,

    #[error("runner invocation failed: {0}")]
    RunnerFailed(String),

    #[error("implement phase completed but review did not pass")]
    ReviewDidNotPass,

    #[error("merge conflict landing branch {branch}")]
    MergeConflict { branch: String },

    #[error("dependency cycle detected among: {0:?}")]
    CycleDetected(Vec<String>),

    #[error("task graph is inconsistent: {0}")]
    GraphInconsistent(String),

    #[error("scheduler state file is corrupt: {0}")]
    StateCorrupt(String),

    #[error("worker task panicked: {0}")]
    Panic(String),
}

impl RunnerError {
    /// Whether this failure still permits another attempt, independent of the
    /// per-task attempt budget (which the Scheduler checks separately).
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RunnerError::TransientTracker(_)
                | RunnerError::RunnerTimeout
                | RunnerError::RunnerNoOutput
                | RunnerError::RunnerFailed(_)
                | RunnerError::ReviewDidNotPass
        )
    }
}
