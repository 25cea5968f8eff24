//! OS process control for coordinated worker sessions.
//!
//! The session core never touches the OS directly; everything goes through
//! the [`ProcessControl`] facade so lifecycle logic stays testable and the
//! platform-specific parts stay in one place.

pub mod control;
#[cfg(unix)]
pub mod unix;

pub use control::{ControlError, ExitWait, ProcessControl, SchedPolicy, SignalKind};
#[cfg(unix)]
pub use unix::UnixProcessControl;
