//! Session core: proxies for coordinated worker-process sessions.
//!
//! A [`SessionProxy`] is the in-process representative of one worker
//! session: who is attached to it, which workers serve it, what payloads
//! are pending for it, and where its OS process stands in the lifecycle
//! `Unvalidated → Valid → ShutdownRequested → Terminated` (with `Invalid`
//! reachable from anywhere on hard failure).
//!
//! ## Modules
//!
//! - [`buffer`]: single-owner payload buffers, consumed at most once.
//! - [`client_table`]: dense slot table mapping attachments to stream ids.
//! - [`worker`]: identity-deduplicated worker membership pool.
//! - [`status`]: lifecycle states and wire-visible enums.
//! - [`proxy`]: the aggregate and its locking discipline.
//! - [`registry`]: the daemon-wide proxy table and ping supervisor.

pub mod buffer;
pub mod client_table;
pub mod proxy;
pub mod registry;
pub mod status;
pub mod worker;

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/proxy_tests.rs"]
mod proxy_tests;

#[cfg(test)]
#[path = "tests/client_table_props.rs"]
mod client_table_props;

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod supervisor_tests;

pub use buffer::PayloadBuffer;
pub use client_table::{ClientId, ClientSlot, ClientTable};
pub use proxy::{
    GroupDescriptor, ProxySnapshot, RuntimeVersion, SessionProxy, TerminateOutcome, VerifyOutcome,
};
pub use registry::{run_ping_supervisor, AdmitRequest, SessionRegistry};
pub use status::{SessionRole, SessionStatus, ShutdownMode};
pub use worker::{WorkerId, WorkerPool};
