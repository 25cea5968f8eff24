//! farmd: coordinator daemon for a parallel-processing worker farm.
//!
//! The daemon admits worker-process sessions, multiplexes client attachments
//! onto them, and drives the lifecycle of the underlying OS processes:
//! liveness verification, priority and scheduling changes, graceful and
//! forceful termination.
//!
//! ## Architecture
//!
//! - **Session core (`session/`)**: the [`session::SessionProxy`] aggregate:
//!   per-session client handle table, worker membership pool, buffered
//!   payloads, and the lifecycle state machine.
//! - **Process control (`process/`)**: OS-level facade for priority,
//!   scheduling class, signals, and bounded exit waits.
//! - **Server (`server.rs`)**: Unix-socket accept loop speaking the
//!   newline-delimited JSON control protocol (`protocol.rs`).
//! - **Transport (`transport.rs`)**: connection handles and the outbound
//!   frame queue linking a proxy to its worker process connection.

pub mod build_info;
pub mod config;
pub mod daemon_log;
pub mod paths;
pub mod process;
pub mod protocol;
#[cfg(unix)]
pub mod server;
pub mod session;
pub mod transport;
