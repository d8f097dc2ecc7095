//! Example `AgentRunner`: spawns a generic line-oriented coding-agent
//! subprocess and parses a minimal JSONL progress/result convention from its
//! stdout, with a SIGTERM-then-SIGKILL teardown on cancellation and secret
//! redaction on every forwarded line.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};

use crate::contracts::{AgentRunner, ProgressFn, RunContext, RunnerCapabilities, RunnerRequest, RunnerResult, RunnerStatus};

/// One parsed line of subprocess stdout, following a minimal convention:
/// `{"type": "progress", "message": "..."}` or
/// `{"type": "result", "status": "completed|failed|blocked", "review_ready": bool, "reason": "..."}`.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AgentLine {
    Progress {
        #[allow(dead_code)]
        message: String,
    },
    Result {
        status: String,
        #[serde(default)]
        review_ready: bool,
        #[serde(default)]
        reason: Option<String>,
    },
}

pub struct SubprocessRunner {
    name: String,
    binary_path: String,
    extra_args: Vec<String>,
}

impl SubprocessRunner {
    pub fn new(name: impl Into<String>, binary_path: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            binary_path: binary_path.into(),
            extra_args,
        }
    }

    async fn terminate(mut child: Child) {
        if let Some(pid) = child.id() {
            #[cfg(unix)]
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
            let waited = tokio::time::timeout(Duration::from_secs(5), child.wait()).await;
            if waited.is_err() {
                let _ = child.kill().await;
            }
        } else {
            let _ = child.kill().await;
        }
    }
}

/// Scrubs common secret-shaped substrings before a line reaches the
/// progress callback or the event stream, per the `AgentRunner` contract's
/// redaction requirement.
pub fn redact_secrets(line: &str) -> String {
    const PREFIXES: &[&str] = &["sk-ant-", "sk-", "ghp_", "gho_", "Bearer "];
    let mut out = line.to_string();
    for prefix in PREFIXES {
        while let Some(start) = out.find(prefix) {
            let tail_start = start + prefix.len();
            let tail_end = out[tail_start..]
                .find(|c: char| c.is_whitespace() || c == '"')
                .map(|offset| tail_start + offset)
                .unwrap_or(out.len());
            out.replace_range(start..tail_end, "[redacted]");
        }
    }
    out
}

#[async_trait]
impl AgentRunner for SubprocessRunner {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &RunContext, request: RunnerRequest, on_progress: ProgressFn) -> Result<RunnerResult> {
        let started_at = Utc::now();

        let mut child = Command::new(&self.binary_path)
            .args(&self.extra_args)
            .current_dir(&request.repo_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .env("RUNNER_TASK_ID", &request.task_id)
            .env("RUNNER_MODE", format!("{:?}", request.mode).to_lowercase())
            .env("RUNNER_MODEL", &request.model)
            .spawn()
            .with_context(|| format!("spawning agent runner binary {}", self.binary_path))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.prompt.as_bytes()).await.ok();
            drop(stdin);
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let mut lines = BufReader::new(stdout).lines();

        let mut final_status = RunnerStatus::Failed;
        let mut reason: Option<String> = None;
        let mut review_ready = false;

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    Self::terminate(child).await;
                    return Ok(RunnerResult {
                        status: RunnerStatus::Blocked,
                        reason: Some("cancelled".into()),
                        review_ready: false,
                        started_at,
                        finished_at: Utc::now(),
                        log_path: None,
                        artifacts: Default::default(),
                    });
                }
                line = lines.next_line() => {
                    match line.context("reading agent stdout")? {
                        Some(raw) => {
                            let scrubbed = redact_secrets(&raw);
                            on_progress(&scrubbed);
                            match serde_json::from_str::<AgentLine>(&raw) {
                                Ok(AgentLine::Progress { .. }) => {}
                                Ok(AgentLine::Result { status, review_ready: rr, reason: r }) => {
                                    final_status = match status.as_str() {
                                        "completed" => RunnerStatus::Completed,
                                        "blocked" => RunnerStatus::Blocked,
                                        _ => RunnerStatus::Failed,
                                    };
                                    review_ready = rr;
                                    reason = r;
                                }
                                Err(_) => {}
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let status = child.wait().await.context("waiting for agent process")?;
        if !status.success() && reason.is_none() {
            reason = Some(format!("process exited with status {status}"));
            if matches!(final_status, RunnerStatus::Completed) {
                final_status = RunnerStatus::Failed;
            }
        }

        Ok(RunnerResult {
            status: final_status,
            reason,
            review_ready,
            started_at,
            finished_at: Utc::now(),
            log_path: None,
            artifacts: Default::default(),
        })
    }

    fn capabilities(&self) -> RunnerCapabilities {
        RunnerCapabilities {
            review: true,
            streaming: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::RunnerMode;
    use std::io::Write;

    fn fake_binary(dir: &std::path::Path, script: &str) -> String {
        let path = dir.join("fake-agent.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{script}").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path.to_string_lossy().to_string()
    }

    fn request(repo_root: &std::path::Path) -> RunnerRequest {
        RunnerRequest {
            task_id: "A".into(),
            repo_root: repo_root.to_string_lossy().to_string(),
            prompt: "do the thing".into(),
            model: "test-model".into(),
            mode: RunnerMode::Implement,
            timeout_secs: 0,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn parses_progress_and_result_lines() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(
            dir.path(),
            r#"echo '{"type":"progress","message":"working"}'
echo '{"type":"result","status":"completed","review_ready":true}'"#,
        );
        let runner = SubprocessRunner::new("fake", bin, vec![]);
        let ctx = RunContext::new();
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();

        let result = runner
            .run(&ctx, request(dir.path()), Box::new(move |line| seen2.lock().unwrap().push(line.to_string())))
            .await
            .unwrap();

        assert!(matches!(result.status, RunnerStatus::Completed));
        assert!(result.review_ready);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn redacts_api_key_shaped_tokens() {
        let redacted = redact_secrets("using key sk-ant-abc123XYZ for auth");
        assert!(redacted.contains("[redacted]"));
        assert!(!redacted.contains("abc123XYZ"));
    }

    #[tokio::test]
    async fn cancellation_terminates_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_binary(dir.path(), "sleep 30");
        let runner = SubprocessRunner::new("fake", bin, vec![]);
        let ctx = RunContext::new();
        let ctx_for_cancel = ctx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx_for_cancel.cancel();
        });

        let result = runner
            .run(&ctx, request(dir.path()), Box::new(|_| {}))
            .await
            .unwrap();
        assert!(matches!(result.status, RunnerStatus::Blocked));
    }
}
