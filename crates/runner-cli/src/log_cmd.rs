//! `yolo-runner log` command: show the recorded event-log lines for a task,
//! reading directly from the JSONL file sink.

use std::path::Path;

use anyhow::{Context, Result};
use runner_core::contracts::Event;

pub fn run_log(event_log_path: &Path, task_id: &str) -> Result<()> {
    if !event_log_path.exists() {
        println!("No event log found at {}.", event_log_path.display());
        return Ok(());
    }

    let contents =
        std::fs::read_to_string(event_log_path).with_context(|| format!("reading event log at {}", event_log_path.display()))?;

    let mut matched = 0usize;
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let event: Event = serde_json::from_str(line).with_context(|| format!("parsing event log line: {line}"))?;
        if event.task_id.as_deref() != Some(task_id) {
            continue;
        }
        matched += 1;
        print_event(&event);
    }

    if matched == 0 {
        println!("No events recorded for task {task_id}.");
    }
    Ok(())
}

fn print_event(event: &Event) {
    let time = event.timestamp.format("%H:%M:%S%.3f");
    let mut line = format!("  [{time}] {}", event.event_type);
    if let Some(worker_id) = &event.worker_id {
        line.push_str(&format!(" worker={worker_id}"));
    }
    if let Some(message) = &event.message {
        line.push_str(&format!(": {message}"));
    }
    println!("{line}");
}
