//! `yolo-runner status` command: summarize the last journaled scheduler
//! state, reading the local JSON journal.

use std::path::Path;

use anyhow::Result;
use runner_core::scheduler::journal::Journal;

pub fn run_status(state_path: &Path) -> Result<()> {
    let journal = Journal::new(state_path);
    let state = journal.load(false)?;

    println!("State file: {}", state_path.display());
    if let Some(last_updated) = state.last_updated {
        println!("Last updated: {}", last_updated.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!();
    println!("Closed: {}", state.closed.len());
    println!("Blocked: {}", state.blocked.len());
    if !state.blocked.is_empty() {
        for (task_id, reason) in &state.blocked {
            println!("  {task_id}: {reason}");
        }
    }
    println!();
    println!("Attempts recorded: {}", state.attempts.len());
    for (task_id, attempts) in &state.attempts {
        println!("  {task_id}: {attempts}");
    }

    Ok(())
}
