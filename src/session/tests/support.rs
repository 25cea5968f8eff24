//! Shared test support for the session core.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::process::{ControlError, ExitWait, ProcessControl, SchedPolicy, SignalKind};

/// Scriptable process-control facade that records every call.
pub struct MockControl {
    alive: AtomicBool,
    /// Signal kind that actually stops the fake process, if any.
    dies_on: Option<SignalKind>,
    refuse_priority: bool,
    refuse_signals: bool,
    calls: Mutex<Vec<String>>,
}

impl MockControl {
    /// A well-behaved process: dies on the graceful signal.
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            dies_on: Some(SignalKind::Terminate),
            refuse_priority: false,
            refuse_signals: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Ignores the graceful signal, dies only on the forceful one.
    pub fn stubborn() -> Self {
        Self {
            dies_on: Some(SignalKind::Kill),
            ..Self::new()
        }
    }

    /// Survives every signal; exit waits always time out.
    pub fn immortal() -> Self {
        Self {
            dies_on: None,
            ..Self::new()
        }
    }

    /// Rejects priority and scheduling calls with a permission error.
    pub fn unprivileged() -> Self {
        Self {
            refuse_priority: true,
            ..Self::new()
        }
    }

    /// Rejects signal delivery with a permission error.
    pub fn signal_refusing() -> Self {
        Self {
            refuse_signals: true,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Default for MockControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessControl for MockControl {
    fn change_priority(&self, pid: i32, delta: i32) -> Result<(), ControlError> {
        self.record(format!("change_priority({}, {})", pid, delta));
        if self.refuse_priority {
            return Err(ControlError::PermissionDenied);
        }
        Ok(())
    }

    fn set_scheduling_policy(
        &self,
        pid: i32,
        policy: SchedPolicy,
        priority: i32,
    ) -> Result<(), ControlError> {
        self.record(format!("set_scheduling_policy({}, {:?}, {})", pid, policy, priority));
        if self.refuse_priority {
            return Err(ControlError::PermissionDenied);
        }
        Ok(())
    }

    fn send_signal(&self, pid: i32, kind: SignalKind) -> Result<(), ControlError> {
        self.record(format!("send_signal({}, {})", pid, kind));
        if self.refuse_signals {
            return Err(ControlError::PermissionDenied);
        }
        if !self.alive.load(Ordering::SeqCst) {
            return Err(ControlError::NoSuchProcess);
        }
        if self.dies_on == Some(kind) {
            self.alive.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_alive(&self, _pid: i32) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn wait_exit(&self, _pid: i32, timeout: Duration) -> ExitWait {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.alive.load(Ordering::SeqCst) {
                return ExitWait::Exited;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return ExitWait::TimedOut;
            }
            tokio::time::sleep(Duration::from_millis(5).min(deadline - now)).await;
        }
    }
}
