//! Configuration for a jobrunner run.
//!
//! Configuration is loaded from `~/.config/jobrunner/config.toml`, or from the
//! path in `$JOBRUNNER_CONFIG` when set. A missing file means defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "JOBRUNNER_CONFIG";

/// Where a child's stderr goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildStderr {
    /// Redirect to `/dev/null`.
    #[default]
    Null,
    /// Share the runner's stderr.
    Inherit,
}

/// Configuration for the job runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// List every runnable job on stdout before launching.
    #[serde(default)]
    pub verbose: bool,

    /// Where children write their stderr.
    #[serde(default)]
    pub child_stderr: ChildStderr,

    /// Upper bound on how long the reactor sleeps between sweeps when no
    /// SIGCHLD arrives, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval() -> u64 {
    50
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            child_stderr: ChildStderr::default(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from the default path.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Get the config file path.
    pub fn config_path() -> Result<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Ok(PathBuf::from(path));
        }

        let dirs = ProjectDirs::from("", "", "jobrunner")
            .context("Could not determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Builder-style verbosity override (the `-v` flag).
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = self.verbose || verbose;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert!(!config.verbose);
        assert_eq!(config.child_stderr, ChildStderr::Null);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
verbose = true
child_stderr = "inherit"
poll_interval_ms = 5
"#;

        let config: RunnerConfig = toml::from_str(toml).expect("parse failed");
        assert!(config.verbose);
        assert_eq!(config.child_stderr, ChildStderr::Inherit);
        assert_eq!(config.poll_interval_ms, 5);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: RunnerConfig = toml::from_str("").expect("parse failed");
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.child_stderr, ChildStderr::Null);
    }

    #[test]
    fn test_unknown_stderr_mode_rejected() {
        assert!(toml::from_str::<RunnerConfig>("child_stderr = \"file\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "verbose = true\n").unwrap();

        let config = RunnerConfig::load_from(&path).unwrap();
        assert!(config.verbose);

        let missing = RunnerConfig::load_from(&dir.path().join("nope.toml"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_verbose_flag_only_raises() {
        let config = RunnerConfig {
            verbose: true,
            ..RunnerConfig::default()
        };
        assert!(config.with_verbose(false).verbose);
        assert!(RunnerConfig::default().with_verbose(true).verbose);
    }

    #[test]
    fn test_poll_interval_never_zero() {
        let config = RunnerConfig {
            poll_interval_ms: 0,
            ..RunnerConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }
}
