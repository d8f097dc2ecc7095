//! Configuration file management for yolo-runner.
//!
//! Provides a TOML-based config file at `~/.config/yolo-runner/config.toml`
//! and a resolution chain: CLI flag > env var > config file > default.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub runner: RunnerSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RunnerSection {
    pub concurrency: Option<usize>,
    pub model: Option<String>,
    pub backend: Option<String>,
    pub binary_path: Option<String>,
    pub runner_timeout_secs: Option<u64>,
    pub watchdog_interval_secs: Option<u64>,
    pub watchdog_timeout_secs: Option<u64>,
    pub output_interval_secs: Option<u64>,
    pub max_attempts_per_task: Option<u32>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the yolo-runner config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/yolo-runner` or
/// `~/.config/yolo-runner`. We intentionally ignore the platform-specific
/// `dirs::config_dir()` (which returns `~/Library/Application Support` on
/// macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("yolo-runner");
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config").join("yolo-runner")
}

/// Return the path to the yolo-runner config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns `Ok(None)` if it does not exist.
pub fn load_config() -> Result<Option<ConfigFile>> {
    let path = config_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(Some(config))
}

/// Serialize and write the config file, creating parent dirs as needed.
/// Sets file permissions to 0600 on Unix. No subcommand writes a config file
/// yet (operators hand-edit `config.toml`); kept for config round-trip tests
/// and a future `init` command.
#[allow(dead_code)]
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir).with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents).with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&path, perms).with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

// -----------------------------------------------------------------------
// CLI overrides and resolved config
// -----------------------------------------------------------------------

/// Flags a subcommand accepted on the command line; `None` means "not
/// passed", so the resolver falls through to env var / file / default.
#[derive(Debug, Default, Clone)]
pub struct RunnerOverrides {
    pub concurrency: Option<usize>,
    pub model: Option<String>,
    pub backend: Option<String>,
    pub binary_path: Option<String>,
    pub runner_timeout_secs: Option<u64>,
    pub watchdog_interval_secs: Option<u64>,
    pub watchdog_timeout_secs: Option<u64>,
    pub output_interval_secs: Option<u64>,
    pub max_attempts_per_task: Option<u32>,
}

/// Fully resolved runner configuration, ready for use.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub concurrency: usize,
    pub model: String,
    pub backend: String,
    pub binary_path: String,
    pub runner_timeout: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_timeout: Duration,
    pub output_interval: Duration,
    pub max_attempts_per_task: u32,
}

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_MODEL: &str = "default";
const DEFAULT_BACKEND: &str = "agent";
const DEFAULT_BINARY_PATH: &str = "agent";
const DEFAULT_RUNNER_TIMEOUT_SECS: u64 = 1800;
const DEFAULT_WATCHDOG_INTERVAL_SECS: u64 = 5;
const DEFAULT_WATCHDOG_TIMEOUT_SECS: u64 = 120;
const DEFAULT_OUTPUT_INTERVAL_SECS: u64 = 2;
const DEFAULT_MAX_ATTEMPTS_PER_TASK: u32 = 3;

impl RunnerConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > built-in default.
    pub fn resolve(overrides: &RunnerOverrides) -> Result<Self> {
        let file = load_config()?.unwrap_or_default();
        let section = file.runner;

        let concurrency = overrides
            .concurrency
            .or_else(|| env_parsed("YOLO_RUNNER_CONCURRENCY"))
            .or(section.concurrency)
            .unwrap_or(DEFAULT_CONCURRENCY);
        let model = overrides
            .model
            .clone()
            .or_else(|| std::env::var("YOLO_RUNNER_MODEL").ok())
            .or(section.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let backend = overrides
            .backend
            .clone()
            .or_else(|| std::env::var("YOLO_RUNNER_BACKEND").ok())
            .or(section.backend)
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let binary_path = overrides
            .binary_path
            .clone()
            .or_else(|| std::env::var("YOLO_RUNNER_BINARY_PATH").ok())
            .or(section.binary_path)
            .unwrap_or_else(|| DEFAULT_BINARY_PATH.to_string());
        let runner_timeout_secs = overrides
            .runner_timeout_secs
            .or_else(|| env_parsed("YOLO_RUNNER_RUNNER_TIMEOUT_SECS"))
            .or(section.runner_timeout_secs)
            .unwrap_or(DEFAULT_RUNNER_TIMEOUT_SECS);
        let watchdog_interval_secs = overrides
            .watchdog_interval_secs
            .or_else(|| env_parsed("YOLO_RUNNER_WATCHDOG_INTERVAL_SECS"))
            .or(section.watchdog_interval_secs)
            .unwrap_or(DEFAULT_WATCHDOG_INTERVAL_SECS);
        let watchdog_timeout_secs = overrides
            .watchdog_timeout_secs
            .or_else(|| env_parsed("YOLO_RUNNER_WATCHDOG_TIMEOUT_SECS"))
            .or(section.watchdog_timeout_secs)
            .unwrap_or(DEFAULT_WATCHDOG_TIMEOUT_SECS);
        let output_interval_secs = overrides
            .output_interval_secs
            .or_else(|| env_parsed("YOLO_RUNNER_OUTPUT_INTERVAL_SECS"))
            .or(section.output_interval_secs)
            .unwrap_or(DEFAULT_OUTPUT_INTERVAL_SECS);
        let max_attempts_per_task = overrides
            .max_attempts_per_task
            .or_else(|| env_parsed("YOLO_RUNNER_MAX_ATTEMPTS_PER_TASK"))
            .or(section.max_attempts_per_task)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS_PER_TASK);

        Ok(Self {
            concurrency,
            model,
            backend,
            binary_path,
            runner_timeout: Duration::from_secs(runner_timeout_secs),
            watchdog_interval: Duration::from_secs(watchdog_interval_secs),
            watchdog_timeout: Duration::from_secs(watchdog_timeout_secs),
            output_interval: Duration::from_secs(output_interval_secs),
            max_attempts_per_task,
        })
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(())).lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn resolve_with_cli_flag_overrides_env_and_default() {
        let _lock = lock_env();
        unsafe { std::env::set_var("YOLO_RUNNER_CONCURRENCY", "9") };

        let overrides = RunnerOverrides {
            concurrency: Some(2),
            ..Default::default()
        };
        let config = RunnerConfig::resolve(&overrides).unwrap();
        assert_eq!(config.concurrency, 2);

        unsafe { std::env::remove_var("YOLO_RUNNER_CONCURRENCY") };
    }

    #[test]
    fn resolve_with_env_var_overrides_default() {
        let _lock = lock_env();
        unsafe { std::env::set_var("YOLO_RUNNER_MODEL", "env-model") };

        let config = RunnerConfig::resolve(&RunnerOverrides::default()).unwrap();
        assert_eq!(config.model, "env-model");

        unsafe { std::env::remove_var("YOLO_RUNNER_MODEL") };
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        let _lock = lock_env();
        unsafe { std::env::remove_var("YOLO_RUNNER_CONCURRENCY") };
        unsafe { std::env::remove_var("YOLO_RUNNER_MODEL") };

        let config = RunnerConfig::resolve(&RunnerOverrides::default()).unwrap();
        assert_eq!(config.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(path.ends_with("yolo-runner/config.toml"), "unexpected config path: {}", path.display());
    }
}
