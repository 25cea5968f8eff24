//! Coordinator configuration.
//!
//! Loaded from `~/.farmd/config.yaml` (or an explicit `--config` path) with
//! serde defaults for every field, then overridden by `FARMD_*` environment
//! variables. Behavioral toggles that were process-wide globals in earlier
//! designs are explicit fields here and travel with the config object.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoordinatorConfig {
    /// Control socket path override. Default: `~/.farmd/coordinator.sock`.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,

    /// Interval between supervisor ping sweeps, in seconds.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// How long a liveness probe may wait for the worker's reply, in seconds.
    #[serde(default = "default_ping_timeout_secs")]
    pub ping_timeout_secs: u64,

    /// Grace period between the termination signal and forceful escalation,
    /// in seconds.
    #[serde(default = "default_terminate_grace_secs")]
    pub terminate_grace_secs: u64,

    /// Interval between registry snapshot writes, in seconds.
    #[serde(default = "default_persist_interval_secs")]
    pub persist_interval_secs: u64,

    /// Lower clamp for the per-session inflate factor (parts per thousand).
    /// A session can be scaled up past its nominal share but never below
    /// this floor.
    #[serde(default = "default_inflate_floor")]
    pub inflate_floor: i32,

    /// Switch newly registered worker processes to the round-robin
    /// scheduling class.
    #[serde(default)]
    pub sched_round_robin: bool,

    /// Runtime version tag advertised to admitted sessions.
    #[serde(default = "default_runtime_tag")]
    pub runtime_tag: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            ping_interval_secs: default_ping_interval_secs(),
            ping_timeout_secs: default_ping_timeout_secs(),
            terminate_grace_secs: default_terminate_grace_secs(),
            persist_interval_secs: default_persist_interval_secs(),
            inflate_floor: default_inflate_floor(),
            sched_round_robin: false,
            runtime_tag: default_runtime_tag(),
        }
    }
}

fn default_ping_interval_secs() -> u64 {
    30
}

fn default_ping_timeout_secs() -> u64 {
    10
}

fn default_terminate_grace_secs() -> u64 {
    5
}

fn default_persist_interval_secs() -> u64 {
    30
}

fn default_inflate_floor() -> i32 {
    1000
}

fn default_runtime_tag() -> String {
    "any".to_string()
}

impl CoordinatorConfig {
    /// Loads the config from an explicit path, or from the default location
    /// if it exists, falling back to defaults otherwise. Environment
    /// overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match crate::paths::config_path() {
                Ok(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Applies `FARMD_*` environment variable overrides for the knobs that
    /// operators most often tune per host.
    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("FARMD_PING_INTERVAL_SECS") {
            self.ping_interval_secs = v;
        }
        if let Some(v) = env_u64("FARMD_PING_TIMEOUT_SECS") {
            self.ping_timeout_secs = v;
        }
        if let Some(v) = env_u64("FARMD_TERMINATE_GRACE_SECS") {
            self.terminate_grace_secs = v;
        }
        if let Some(v) = env_u64("FARMD_PERSIST_INTERVAL_SECS") {
            self.persist_interval_secs = v;
        }
    }

    /// Resolved control socket path.
    pub fn socket_path(&self) -> Result<PathBuf> {
        match &self.socket_path {
            Some(p) => Ok(p.clone()),
            None => crate::paths::socket_path(),
        }
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_secs(self.terminate_grace_secs)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.persist_interval_secs)
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.ping_interval_secs, 30);
        assert_eq!(config.ping_timeout_secs, 10);
        assert_eq!(config.terminate_grace_secs, 5);
        assert_eq!(config.inflate_floor, 1000);
        assert!(!config.sched_round_robin);
        assert!(config.socket_path.is_none());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: CoordinatorConfig =
            serde_yaml::from_str("ping_timeout_secs: 3\nsched_round_robin: true\n").unwrap();
        assert_eq!(config.ping_timeout_secs, 3);
        assert!(config.sched_round_robin);
        assert_eq!(config.ping_interval_secs, 30);
        assert_eq!(config.inflate_floor, 1000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "terminate_grace_secs: 9\nruntime_tag: v6.32\n").unwrap();

        let config = CoordinatorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.terminate_grace_secs, 9);
        assert_eq!(config.runtime_tag, "v6.32");
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "ping_timeout_secs: [not a number\n").unwrap();

        assert!(CoordinatorConfig::load(Some(&path)).is_err());
    }

    #[test]
    #[serial]
    fn test_env_override() {
        std::env::set_var("FARMD_PING_TIMEOUT_SECS", "42");
        let mut config = CoordinatorConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("FARMD_PING_TIMEOUT_SECS");

        assert_eq!(config.ping_timeout_secs, 42);
    }

    #[test]
    #[serial]
    fn test_env_override_ignores_garbage() {
        std::env::set_var("FARMD_PING_TIMEOUT_SECS", "soon");
        let mut config = CoordinatorConfig::default();
        config.apply_env_overrides();
        std::env::remove_var("FARMD_PING_TIMEOUT_SECS");

        assert_eq!(config.ping_timeout_secs, 10);
    }
}
