//! Session lifecycle states and related wire-visible enums.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a worker-process session.
///
/// `Terminated` is terminal; `Invalid` is reachable from any state on hard
/// failure. This is distinct from the shutdown-requested flag, which only
/// excludes a still-running session from new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionStatus {
    /// Admitted, worker process not yet confirmed responsive.
    #[default]
    Unvalidated,
    /// Worker process answered a liveness probe.
    Valid,
    /// Termination has been requested; excluded from scheduling.
    ShutdownRequested,
    /// Worker process confirmed (or presumed) gone.
    Terminated,
    /// Hard failure; the slot is reclaimable.
    Invalid,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unvalidated => "Unvalidated",
            SessionStatus::Valid => "Valid",
            SessionStatus::ShutdownRequested => "ShutdownRequested",
            SessionStatus::Terminated => "Terminated",
            SessionStatus::Invalid => "Invalid",
        }
    }

    /// Whether the slot holding a session in this state may be recycled.
    pub fn reclaimable(&self) -> bool {
        matches!(self, SessionStatus::Terminated | SessionStatus::Invalid)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role a session plays in the worker hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    /// Top-level master coordinating the whole job.
    #[default]
    Master,
    /// Intermediate master in a multi-tier setup.
    Submaster,
    /// Leaf compute process.
    Worker,
}

impl std::fmt::Display for SessionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionRole::Master => write!(f, "master"),
            SessionRole::Submaster => write!(f, "submaster"),
            SessionRole::Worker => write!(f, "worker"),
        }
    }
}

/// How an armed shutdown is delivered to the worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownMode {
    /// Administrative message over the session's transport channel.
    #[default]
    Message,
    /// Termination signal through the process-control facade.
    Signal,
}
