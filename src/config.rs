use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Environment variable pointing at an explicit config file
pub const CONFIG_ENV: &str = "AGENT_DECK_CONFIG";

/// Console settings, read from `<config_dir>/agent-deck/config.json`.
///
/// Every field has a default, so a partial file is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tmux_path: String,
    /// tmux server socket name (`-L`); the default server when unset
    pub tmux_socket: Option<String>,
    /// Managed sessions are named `<prefix>-<number>`
    pub session_prefix: String,
    /// Typed into every new session (e.g. `claude`)
    pub default_command: Option<String>,
    /// Working directory for new sessions; defaults to the console's cwd
    pub work_dir: Option<PathBuf>,
    /// Transcripts, checkpoints and the log file; defaults to the platform data dir
    pub data_dir: Option<PathBuf>,

    pub tick_ms: u64,
    pub list_interval_ms: u64,
    pub capture_timeout_ms: u64,
    /// Deadline for any single tmux command
    pub command_timeout_ms: u64,
    pub cache_ttl_ms: u64,
    /// Lines kept in memory per session
    pub buffer_capacity: usize,
    /// A reader with no output for this long is bypassed by the cascade
    pub stale_after_ms: u64,
    pub health_interval_ms: u64,
    pub probe_timeout_ms: u64,
    /// Consecutive failed probes before a session is declared dead
    pub failure_threshold: u32,
    /// How long a dead session stays visible before removal
    pub dead_grace_ms: u64,
    pub checkpoint_lines: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tmux_path: "tmux".to_string(),
            tmux_socket: None,
            session_prefix: "deck".to_string(),
            default_command: None,
            work_dir: None,
            data_dir: None,
            tick_ms: 250,
            list_interval_ms: 1000,
            capture_timeout_ms: 400,
            command_timeout_ms: 2000,
            cache_ttl_ms: 200,
            buffer_capacity: 2000,
            stale_after_ms: 5000,
            health_interval_ms: 2000,
            probe_timeout_ms: 800,
            failure_threshold: 3,
            dead_grace_ms: 3000,
            checkpoint_lines: 200,
        }
    }
}

impl Config {
    /// Load from `$AGENT_DECK_CONFIG` or the default location.
    ///
    /// Missing file means defaults. A broken file is an error; the caller
    /// logs it and carries on with defaults so the console still starts.
    pub fn load() -> anyhow::Result<Self> {
        match Self::path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// File `load` reads from, if any location is known.
    pub fn path() -> Option<PathBuf> {
        std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .or_else(Self::default_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("agent-deck").join("config.json"))
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(std::env::temp_dir)
                .join("agent-deck")
        })
    }

    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(16))
    }

    pub fn list_interval(&self) -> Duration {
        Duration::from_millis(self.list_interval_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.max(1))
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn dead_grace(&self) -> Duration {
        Duration::from_millis(self.dead_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"session_prefix": "agents", "tick_ms": 100}}"#).expect("write");

        let config = Config::load_from(file.path()).expect("load");
        assert_eq!(config.session_prefix, "agents");
        assert_eq!(config.tick(), Duration::from_millis(100));
        assert_eq!(config.buffer_capacity, 2000);
        assert_eq!(config.tmux_path, "tmux");
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "not json").expect("write");
        assert!(Config::load_from(file.path()).is_err());
    }

    #[test]
    fn test_env_override_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::set_var(CONFIG_ENV, dir.path().join("absent.json"));
        let config = Config::load().expect("defaults");
        std::env::remove_var(CONFIG_ENV);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_tick_has_floor() {
        let config = Config {
            tick_ms: 0,
            ..Config::default()
        };
        assert_eq!(config.tick(), Duration::from_millis(16));
    }
}
