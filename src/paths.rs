//! Centralized home-based storage paths for all farmd persistence.
//!
//! Everything lives under `~/.farmd/`:
//! - `coordinator.sock` - control socket
//! - `coordinator.pid` - pid file of the running coordinator
//! - `coordinator.lock` - advisory lock keeping the coordinator a singleton
//! - `build-sha` - build SHA of the running coordinator
//! - `registry.json` - last persisted session registry snapshot
//! - `logs/daemon-debug.log` - debug log

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

/// The name of the farmd home directory.
const FARMD_DIR: &str = ".farmd";

/// Returns the home-based farmd directory: `~/.farmd/`
///
/// Creates the directory if it doesn't exist.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn farmd_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory for farmd storage")?;
    let farmd_dir = home.join(FARMD_DIR);
    fs::create_dir_all(&farmd_dir)
        .with_context(|| format!("Failed to create farmd directory: {}", farmd_dir.display()))?;
    Ok(farmd_dir)
}

/// Returns the coordinator control socket path: `~/.farmd/coordinator.sock`
pub fn socket_path() -> Result<PathBuf> {
    Ok(farmd_home_dir()?.join("coordinator.sock"))
}

/// Returns the coordinator pid file path: `~/.farmd/coordinator.pid`
pub fn pid_path() -> Result<PathBuf> {
    Ok(farmd_home_dir()?.join("coordinator.pid"))
}

/// Returns the coordinator singleton lock path: `~/.farmd/coordinator.lock`
pub fn lock_path() -> Result<PathBuf> {
    Ok(farmd_home_dir()?.join("coordinator.lock"))
}

/// Returns the build SHA marker path: `~/.farmd/build-sha`
pub fn build_sha_path() -> Result<PathBuf> {
    Ok(farmd_home_dir()?.join("build-sha"))
}

/// Returns the registry snapshot path: `~/.farmd/registry.json`
pub fn registry_path() -> Result<PathBuf> {
    Ok(farmd_home_dir()?.join("registry.json"))
}

/// Returns the default config path: `~/.farmd/config.yaml`
pub fn config_path() -> Result<PathBuf> {
    Ok(farmd_home_dir()?.join("config.yaml"))
}

/// Returns the logs directory: `~/.farmd/logs/`
///
/// Creates the directory if it doesn't exist.
pub fn logs_dir() -> Result<PathBuf> {
    let dir = farmd_home_dir()?.join("logs");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}

/// Returns the debug log path: `~/.farmd/logs/daemon-debug.log`
pub fn debug_log_path() -> Result<PathBuf> {
    Ok(logs_dir()?.join("daemon-debug.log"))
}
