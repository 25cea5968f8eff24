//! Unix implementation of the process-control facade.
//!
//! Priority changes use getpriority/setpriority relative to the process's
//! current value. Liveness is probed with signal 0; the exit wait polls that
//! probe because the coordinator is not necessarily the parent of the worker
//! pid, so `waitpid` is not available to it.

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::time::Duration;

use super::control::{ControlError, ExitWait, ProcessControl, SchedPolicy, SignalKind};

/// Cadence of the liveness probe inside `wait_exit`.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bounds for setpriority nice values.
const PRIO_MIN: i32 = -20;
const PRIO_MAX: i32 = 19;

/// Process control backed by Unix syscalls.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnixProcessControl;

impl UnixProcessControl {
    pub fn new() -> Self {
        Self
    }
}

fn map_errno(errno: Errno) -> ControlError {
    match errno {
        Errno::EPERM | Errno::EACCES => ControlError::PermissionDenied,
        Errno::ESRCH => ControlError::NoSuchProcess,
        e => ControlError::Os(e as i32),
    }
}

#[async_trait]
impl ProcessControl for UnixProcessControl {
    fn change_priority(&self, pid: i32, delta: i32) -> Result<(), ControlError> {
        // -1 is a legal priority, so errno must be cleared before the call
        // to distinguish it from a failure.
        Errno::clear();
        let current =
            unsafe { nix::libc::getpriority(nix::libc::PRIO_PROCESS as _, pid as _) };
        if current == -1 && Errno::last_raw() != 0 {
            return Err(map_errno(Errno::last()));
        }

        let wanted = (current + delta).clamp(PRIO_MIN, PRIO_MAX);
        let rc =
            unsafe { nix::libc::setpriority(nix::libc::PRIO_PROCESS as _, pid as _, wanted) };
        if rc != 0 {
            return Err(map_errno(Errno::last()));
        }
        Ok(())
    }

    #[cfg(target_os = "linux")]
    fn set_scheduling_policy(
        &self,
        pid: i32,
        policy: SchedPolicy,
        priority: i32,
    ) -> Result<(), ControlError> {
        let policy_c = match policy {
            SchedPolicy::Default => nix::libc::SCHED_OTHER,
            SchedPolicy::RoundRobin => nix::libc::SCHED_RR,
        };
        let param = nix::libc::sched_param {
            sched_priority: priority,
        };
        let rc = unsafe { nix::libc::sched_setscheduler(pid, policy_c, &param) };
        if rc != 0 {
            return Err(map_errno(Errno::last()));
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    fn set_scheduling_policy(
        &self,
        _pid: i32,
        _policy: SchedPolicy,
        _priority: i32,
    ) -> Result<(), ControlError> {
        Err(ControlError::Unsupported)
    }

    fn send_signal(&self, pid: i32, kind: SignalKind) -> Result<(), ControlError> {
        let signal = match kind {
            SignalKind::Terminate => Signal::SIGTERM,
            SignalKind::Kill => Signal::SIGKILL,
        };
        kill(Pid::from_raw(pid), signal).map_err(map_errno)
    }

    fn is_alive(&self, pid: i32) -> bool {
        // Signal 0 performs the permission and existence checks only.
        // EPERM still means the process exists.
        match kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    async fn wait_exit(&self, pid: i32, timeout: Duration) -> ExitWait {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if !self.is_alive(pid) {
                return ExitWait::Exited;
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return ExitWait::TimedOut;
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(EXIT_POLL_INTERVAL)).await;
        }
    }
}
