//! The process-control facade contract.
//!
//! Four operations are consumed by the session core: relative priority
//! change, scheduling-class change, signal delivery, and a bounded wait for
//! process exit. Failures are reported to the caller and never retried here;
//! retry policy belongs to the coordinator's control loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Signals the coordinator delivers to worker processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Graceful termination request (SIGTERM).
    Terminate,
    /// Forceful kill, not blockable (SIGKILL).
    Kill,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "terminate"),
            SignalKind::Kill => write!(f, "kill"),
        }
    }
}

/// Scheduling classes the coordinator can place a worker process in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchedPolicy {
    /// The OS default time-sharing class.
    #[default]
    Default,
    /// Real-time round-robin class.
    RoundRobin,
}

/// Outcome of a bounded wait for process exit.
///
/// A timeout is not an error: the caller decides whether to escalate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitWait {
    Exited,
    TimedOut,
}

/// Failure of an OS-level control call. The target process state is
/// unchanged when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// The OS rejected the call (e.g., renicing a process we don't own).
    PermissionDenied,
    /// The target process is already gone.
    NoSuchProcess,
    /// The operation is not available on this platform.
    Unsupported,
    /// Any other OS failure, carrying the raw errno.
    Os(i32),
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlError::PermissionDenied => write!(f, "permission denied"),
            ControlError::NoSuchProcess => write!(f, "no such process"),
            ControlError::Unsupported => write!(f, "unsupported on this platform"),
            ControlError::Os(errno) => write!(f, "os error (errno {})", errno),
        }
    }
}

impl std::error::Error for ControlError {}

/// OS-level control over a worker process, keyed by pid.
///
/// Implementations must bound every blocking call; `wait_exit` is the only
/// operation allowed to wait at all, and only up to `timeout`.
#[async_trait]
pub trait ProcessControl: Send + Sync {
    /// Adjusts the process priority by a relative delta.
    fn change_priority(&self, pid: i32, delta: i32) -> Result<(), ControlError>;

    /// Places the process in the given scheduling class at the given
    /// (class-specific) priority.
    fn set_scheduling_policy(
        &self,
        pid: i32,
        policy: SchedPolicy,
        priority: i32,
    ) -> Result<(), ControlError>;

    /// Delivers a signal to the process.
    fn send_signal(&self, pid: i32, kind: SignalKind) -> Result<(), ControlError>;

    /// Whether the process still exists.
    fn is_alive(&self, pid: i32) -> bool;

    /// Waits for the process to exit, up to `timeout`.
    async fn wait_exit(&self, pid: i32, timeout: Duration) -> ExitWait;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_error_display() {
        assert_eq!(format!("{}", ControlError::PermissionDenied), "permission denied");
        assert_eq!(format!("{}", ControlError::NoSuchProcess), "no such process");
        assert_eq!(format!("{}", ControlError::Os(22)), "os error (errno 22)");
    }

    #[test]
    fn test_sched_policy_serde() {
        let json = serde_json::to_string(&SchedPolicy::RoundRobin).unwrap();
        assert_eq!(json, "\"round_robin\"");
        let parsed: SchedPolicy = serde_json::from_str("\"default\"").unwrap();
        assert_eq!(parsed, SchedPolicy::Default);
    }
}
