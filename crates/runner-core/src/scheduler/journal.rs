//! State Journal: persists [`SchedulerState`] to a local JSON file with
//! atomic write-via-rename and restrictive permissions.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::contracts::SchedulerState;
use crate::error::RunnerError;

pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the journaled state, or a fresh one if no file exists yet.
    /// Unknown fields are tolerated for forward compatibility; a corrupt
    /// file aborts unless `reset_on_corrupt` is set (the `--reset-state`
    /// CLI override).
    pub fn load(&self, reset_on_corrupt: bool) -> Result<SchedulerState, RunnerError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SchedulerState::new());
            }
            Err(err) => {
                return Err(RunnerError::StateCorrupt(format!(
                    "failed to read {}: {err}",
                    self.path.display()
                )));
            }
        };

        match serde_json::from_str::<SchedulerState>(&raw) {
            Ok(state) => Ok(state),
            Err(err) if reset_on_corrupt => {
                tracing::warn!(path = %self.path.display(), error = %err, "discarding corrupt scheduler state");
                Ok(SchedulerState::new())
            }
            Err(err) => Err(RunnerError::StateCorrupt(format!(
                "{}: {err}",
                self.path.display()
            ))),
        }
    }

    /// Atomic write-via-rename: serialize to `<path>.tmp`, then rename over
    /// `<path>`. Never partial-writes the live file.
    pub fn save(&self, state: &mut SchedulerState) -> Result<(), RunnerError> {
        state.last_updated = Some(Utc::now());
        let body = serde_json::to_vec_pretty(state)
            .map_err(|err| RunnerError::StateCorrupt(format!("failed to serialize state: {err}")))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| RunnerError::StateCorrupt(format!("failed to create {}: {err}", parent.display())))?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &body)
            .map_err(|err| RunnerError::StateCorrupt(format!("failed to write {}: {err}", tmp_path.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o644);
            let _ = std::fs::set_permissions(&tmp_path, perms);
        }

        std::fs::rename(&tmp_path, &self.path)
            .map_err(|err| RunnerError::StateCorrupt(format!("failed to rename into {}: {err}", self.path.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_preserves_all_keys() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("scheduler-state.json"));

        let mut state = SchedulerState::new();
        state.attempts.insert("A".into(), 2);
        state.closed.insert("B".into());
        state.blocked.insert("C".into(), "retry_budget_exhausted".into());

        journal.save(&mut state).unwrap();
        let loaded = journal.load(false).unwrap();

        assert_eq!(loaded.attempts, state.attempts);
        assert_eq!(loaded.closed, state.closed);
        assert_eq!(loaded.blocked, state.blocked);
    }

    #[test]
    fn missing_file_yields_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("does-not-exist.json"));
        let state = journal.load(false).unwrap();
        assert!(state.attempts.is_empty());
    }

    #[test]
    fn corrupt_file_aborts_unless_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler-state.json");
        std::fs::write(&path, "not json").unwrap();
        let journal = Journal::new(&path);

        assert!(journal.load(false).is_err());
        let state = journal.load(true).unwrap();
        assert!(state.attempts.is_empty());
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduler-state.json");
        std::fs::write(
            &path,
            r#"{"version":1,"attempts":{},"closed":[],"blocked":{},"last_updated":null,"future_field":42}"#,
        )
        .unwrap();
        let journal = Journal::new(&path);
        assert!(journal.load(false).is_ok());
    }
}
