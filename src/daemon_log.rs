//! Shared debug logging utility for coordinator components.

use std::io::Write;

/// Debug logging utility for coordinator components.
///
/// The `tag` parameter identifies the source module (e.g., "server",
/// "supervisor", "registry") to aid debugging.
///
/// Writes to ~/.farmd/logs/daemon-debug.log
pub fn daemon_log(tag: &str, msg: &str) {
    if let Ok(log_path) = crate::paths::debug_log_path() {
        if let Ok(mut file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
        {
            let now = chrono::Local::now().format("%H:%M:%S%.3f");
            let _ = writeln!(file, "[{}] [{}] {}", now, tag, msg);
        }
    }
}
