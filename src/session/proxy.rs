//! The session proxy: in-process representative of one worker-process
//! session.
//!
//! One mutex guards all mutable state; every public operation acquires it
//! once for its full duration and the private helpers never lock, so there
//! is no reentrancy. The lock is never held across channel sends, facade
//! calls, or any `.await`: values are copied out under the lock and the
//! I/O happens after release. Operations on one proxy are linearizable;
//! distinct proxies are fully independent.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::process::{ControlError, ExitWait, ProcessControl, SchedPolicy, SignalKind};
use crate::session::buffer::PayloadBuffer;
use crate::session::client_table::{ClientId, ClientTable};
use crate::session::status::{SessionRole, SessionStatus, ShutdownMode};
use crate::session::worker::{WorkerId, WorkerPool};
use crate::transport::{ClientConn, Frame, SessionChannel};

/// Bound on the post-SIGKILL exit confirmation wait.
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2);

/// Real-time priority used when a session is switched to round-robin.
const ROUND_ROBIN_PRIORITY: i32 = 1;

/// Runtime-version descriptor, shared (non-exclusively) between sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeVersion {
    pub tag: String,
}

/// Owner-group descriptor, shared between sessions of the same group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDescriptor {
    pub name: String,
}

/// Result of a liveness verification. A timeout is reported distinctly from
/// failure so the caller can retry; the proxy never retries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Responsive,
    TimedOut,
}

impl VerifyOutcome {
    pub fn responsive(&self) -> bool {
        matches!(self, VerifyOutcome::Responsive)
    }
}

/// Result of a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// Process exited within the grace period.
    Exited,
    /// Graceful signal did not take effect; exit confirmed after escalation.
    Forced,
    /// Exit unconfirmed even after escalation; the slot is reclaimed anyway
    /// and the caller must not keep retrying.
    TimedOut,
}

impl TerminateOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminateOutcome::Exited => "exited",
            TerminateOutcome::Forced => "forced",
            TerminateOutcome::TimedOut => "timed_out",
        }
    }
}

/// Point-in-time copy of the proxy state, taken under one lock acquisition.
#[derive(Debug, Clone)]
pub struct ProxySnapshot {
    pub id: usize,
    pub tag: String,
    pub client: String,
    pub alias: String,
    pub ordinal: String,
    pub role: SessionRole,
    pub status: SessionStatus,
    pub valid: bool,
    pub shutdown_requested: bool,
    pub pid: Option<i32>,
    pub clients: usize,
    pub workers: Vec<WorkerId>,
    pub inflate: i32,
    pub frac_eff: f32,
    pub updated_at: String,
}

struct ProxyInner {
    status: SessionStatus,
    valid: bool,
    shutdown_requested: bool,
    pid: Option<i32>,
    role: SessionRole,
    protocol_version: u8,

    tag: String,
    alias: String,
    client: String,
    fileout: String,
    ordinal: String,
    user_envs: String,

    parent: Option<ClientId>,
    clients: ClientTable,
    workers: WorkerPool,

    start_msg: Option<PayloadBuffer>,
    requirements: Option<PayloadBuffer>,
    query_seq: Option<PayloadBuffer>,

    channel: Option<SessionChannel>,
    ping: Option<Arc<Notify>>,
    shutdown_timer: Option<AbortHandle>,

    runtime: Option<Arc<RuntimeVersion>>,
    group: Option<Arc<GroupDescriptor>>,

    inflate: i32,
    inflate_floor: i32,
    frac_eff: f32,
    sched: SchedPolicy,
    default_sched: SchedPolicy,
    default_sched_priority: i32,

    updated_at: String,
}

impl ProxyInner {
    fn blank() -> Self {
        Self {
            status: SessionStatus::Unvalidated,
            valid: false,
            shutdown_requested: false,
            pid: None,
            role: SessionRole::default(),
            protocol_version: 0,
            tag: String::new(),
            alias: String::new(),
            client: String::new(),
            fileout: String::new(),
            ordinal: String::new(),
            user_envs: String::new(),
            parent: None,
            clients: ClientTable::new(),
            workers: WorkerPool::new(),
            start_msg: None,
            requirements: None,
            query_seq: None,
            channel: None,
            ping: None,
            shutdown_timer: None,
            runtime: None,
            group: None,
            inflate: 1000,
            inflate_floor: 1000,
            frac_eff: 0.0,
            sched: SchedPolicy::Default,
            default_sched: SchedPolicy::Default,
            default_sched_priority: 0,
            updated_at: Utc::now().to_rfc3339(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }

    fn set_string(field: &mut String, value: &str) {
        field.clear();
        field.push_str(value);
    }
}

/// In-process representative of one worker-process session.
pub struct SessionProxy {
    id: usize,
    inner: Mutex<ProxyInner>,
}

impl SessionProxy {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            inner: Mutex::new(ProxyInner::blank()),
        }
    }

    /// Session id; the registry slot identity, immutable for the proxy's
    /// lifetime.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn matches(&self, id: usize) -> bool {
        self.id == id
    }

    // A poisoned lock means a panic interrupted an in-memory mutation;
    // recover the guard so the supervisor path stays available.
    fn locked(&self) -> MutexGuard<'_, ProxyInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // ---- status and identity ------------------------------------------

    pub fn status(&self) -> SessionStatus {
        self.locked().status
    }

    pub fn status_str(&self) -> &'static str {
        self.locked().status.as_str()
    }

    pub fn is_valid(&self) -> bool {
        self.locked().valid
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.locked().shutdown_requested
    }

    pub fn pid(&self) -> Option<i32> {
        self.locked().pid
    }

    /// Records the pid of the controlled OS process along with its current
    /// scheduling parameters, so later scheduling changes stay reversible.
    pub fn set_pid(&self, pid: i32) {
        let mut inner = self.locked();
        inner.pid = Some(pid);
        inner.touch();
    }

    pub fn set_default_sched(&self, policy: SchedPolicy, priority: i32) {
        let mut inner = self.locked();
        inner.default_sched = policy;
        inner.default_sched_priority = priority;
        inner.sched = policy;
    }

    pub fn sched(&self) -> SchedPolicy {
        self.locked().sched
    }

    pub fn role(&self) -> SessionRole {
        self.locked().role
    }

    pub fn set_role(&self, role: SessionRole) {
        self.locked().role = role;
    }

    pub fn protocol_version(&self) -> u8 {
        self.locked().protocol_version
    }

    pub fn set_protocol_version(&self, version: u8) {
        self.locked().protocol_version = version;
    }

    pub fn set_status(&self, status: SessionStatus) {
        let mut inner = self.locked();
        inner.status = status;
        inner.touch();
    }

    pub fn set_valid(&self, valid: bool) {
        let mut inner = self.locked();
        inner.valid = valid;
        inner.touch();
    }

    /// Hard failure: the session keeps its identity for inspection but is
    /// excluded from everything and its slot becomes reclaimable.
    pub fn mark_invalid(&self) {
        let timer = {
            let mut inner = self.locked();
            inner.status = SessionStatus::Invalid;
            inner.valid = false;
            inner.touch();
            inner.shutdown_timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    // ---- string fields -------------------------------------------------
    //
    // An empty input clears the field; the previous value is dropped either
    // way.

    pub fn tag(&self) -> String {
        self.locked().tag.clone()
    }

    pub fn set_tag(&self, tag: &str) {
        let mut inner = self.locked();
        ProxyInner::set_string(&mut inner.tag, tag);
    }

    pub fn alias(&self) -> String {
        self.locked().alias.clone()
    }

    pub fn set_alias(&self, alias: &str) {
        let mut inner = self.locked();
        ProxyInner::set_string(&mut inner.alias, alias);
    }

    pub fn client(&self) -> String {
        self.locked().client.clone()
    }

    pub fn set_client(&self, client: &str) {
        let mut inner = self.locked();
        ProxyInner::set_string(&mut inner.client, client);
    }

    pub fn fileout(&self) -> String {
        self.locked().fileout.clone()
    }

    pub fn set_fileout(&self, fileout: &str) {
        let mut inner = self.locked();
        ProxyInner::set_string(&mut inner.fileout, fileout);
    }

    pub fn ordinal(&self) -> String {
        self.locked().ordinal.clone()
    }

    pub fn set_ordinal(&self, ordinal: &str) {
        let mut inner = self.locked();
        ProxyInner::set_string(&mut inner.ordinal, ordinal);
    }

    pub fn user_envs(&self) -> String {
        self.locked().user_envs.clone()
    }

    pub fn set_user_envs(&self, user_envs: &str) {
        let mut inner = self.locked();
        ProxyInner::set_string(&mut inner.user_envs, user_envs);
    }

    // ---- shared descriptors -------------------------------------------

    pub fn runtime(&self) -> Option<Arc<RuntimeVersion>> {
        self.locked().runtime.clone()
    }

    pub fn set_runtime(&self, runtime: Arc<RuntimeVersion>) {
        self.locked().runtime = Some(runtime);
    }

    pub fn group(&self) -> Option<Arc<GroupDescriptor>> {
        self.locked().group.clone()
    }

    pub fn set_group(&self, group: Option<Arc<GroupDescriptor>>) {
        self.locked().group = group;
    }

    // ---- resource shares ----------------------------------------------

    pub fn frac_eff(&self) -> f32 {
        self.locked().frac_eff
    }

    pub fn set_frac_eff(&self, frac_eff: f32) {
        self.locked().frac_eff = frac_eff;
    }

    pub fn inflate(&self) -> i32 {
        self.locked().inflate
    }

    pub fn set_inflate_floor(&self, floor: i32) {
        self.locked().inflate_floor = floor;
    }

    // ---- client multiplexing ------------------------------------------

    /// Occupies the lowest free client slot for `conn`, returning a
    /// generation-stamped handle. Indices stay dense and reusable because
    /// stream ids are transmitted over the wire.
    pub fn attach_client(&self, conn: &Arc<ClientConn>, stream_id: u16) -> ClientId {
        let mut inner = self.locked();
        let id = inner.clients.attach(conn, stream_id);
        inner.touch();
        id
    }

    /// Resets the handle's slot to invalid, keeping the index allocatable.
    /// A stale handle (slot already reused) is rejected.
    pub fn detach_client(&self, id: ClientId) -> bool {
        let mut inner = self.locked();
        let detached = inner.clients.detach(id);
        if detached {
            if inner.parent == Some(id) {
                inner.parent = None;
            }
            inner.touch();
        }
        detached
    }

    /// Count of currently valid client attachments, not table length.
    pub fn client_count(&self) -> usize {
        self.locked().clients.valid_count()
    }

    pub fn client_stream_id(&self, id: ClientId) -> Option<u16> {
        self.locked().clients.lookup(id).map(|slot| slot.stream_id())
    }

    pub fn client_conn(&self, id: ClientId) -> Option<Arc<ClientConn>> {
        self.locked().clients.lookup(id).and_then(|slot| slot.conn())
    }

    /// Marks the attachment that created this session.
    pub fn set_parent(&self, id: ClientId) {
        self.locked().parent = Some(id);
    }

    pub fn parent(&self) -> Option<ClientId> {
        self.locked().parent
    }

    pub fn is_parent(&self, conn: &Arc<ClientConn>) -> bool {
        let inner = self.locked();
        inner
            .parent
            .and_then(|id| inner.clients.lookup(id))
            .and_then(|slot| slot.conn())
            .is_some_and(|parent| Arc::ptr_eq(&parent, conn))
    }

    // ---- worker pool ---------------------------------------------------

    pub fn add_worker(&self, worker: WorkerId) {
        let mut inner = self.locked();
        inner.workers.add(worker);
        inner.touch();
    }

    pub fn remove_worker(&self, worker: &WorkerId) {
        let mut inner = self.locked();
        inner.workers.remove(worker);
        inner.touch();
    }

    pub fn has_worker(&self, worker: &WorkerId) -> bool {
        self.locked().workers.contains(worker)
    }

    pub fn worker_count(&self) -> usize {
        self.locked().workers.len()
    }

    pub fn workers(&self) -> Vec<WorkerId> {
        self.locked().workers.snapshot()
    }

    // ---- buffered payloads ---------------------------------------------
    //
    // Each payload is consumed at most once; replacement drops the previous
    // contents.

    pub fn set_start_msg(&self, buf: PayloadBuffer) {
        self.locked().start_msg = Some(buf);
    }

    pub fn take_start_msg(&self) -> Option<PayloadBuffer> {
        self.locked().start_msg.take()
    }

    pub fn clear_start_msg(&self) {
        self.locked().start_msg = None;
    }

    pub fn set_requirements(&self, buf: PayloadBuffer) {
        self.locked().requirements = Some(buf);
    }

    pub fn take_requirements(&self) -> Option<PayloadBuffer> {
        self.locked().requirements.take()
    }

    pub fn clear_requirements(&self) {
        self.locked().requirements = None;
    }

    pub fn set_query_seq(&self, buf: PayloadBuffer) {
        self.locked().query_seq = Some(buf);
    }

    pub fn take_query_seq(&self) -> Option<PayloadBuffer> {
        self.locked().query_seq.take()
    }

    pub fn clear_query_seq(&self) {
        self.locked().query_seq = None;
    }

    // ---- transport channel ---------------------------------------------

    pub fn set_channel(&self, channel: SessionChannel) {
        self.locked().channel = Some(channel);
    }

    pub fn clear_channel(&self) {
        self.locked().channel = None;
    }

    pub fn has_channel(&self) -> bool {
        self.locked().channel.is_some()
    }

    /// Delivered by the transport task when the worker's asynchronous ping
    /// reply arrives; wakes a pending `verify`, or stores the permit if the
    /// reply won the race.
    pub fn ping_reply(&self) {
        let notify = self.locked().ping.clone();
        if let Some(notify) = notify {
            notify.notify_one();
        }
    }

    // ---- lifecycle ------------------------------------------------------

    /// Sends a liveness probe to the worker process and waits, bounded by
    /// `timeout`, for the reply to arrive on the transport task.
    ///
    /// A timeout leaves validity untouched so the caller may retry.
    pub async fn verify(&self, timeout: Duration) -> Result<VerifyOutcome> {
        let (notify, channel) = {
            let mut inner = self.locked();
            if inner.ping.is_some() {
                bail!("a verification is already in flight for session {}", self.id);
            }
            let channel = inner
                .channel
                .clone()
                .with_context(|| format!("session {} has no transport channel", self.id))?;
            let notify = Arc::new(Notify::new());
            inner.ping = Some(notify.clone());
            (notify, channel)
        };

        if let Err(e) = channel.send(Frame::ping()) {
            self.locked().ping = None;
            return Err(e);
        }

        let waited = tokio::time::timeout(timeout, notify.notified()).await;

        let mut inner = self.locked();
        inner.ping = None;
        match waited {
            Ok(()) => {
                inner.valid = true;
                if inner.status == SessionStatus::Unvalidated {
                    inner.status = SessionStatus::Valid;
                }
                inner.touch();
                Ok(VerifyOutcome::Responsive)
            }
            Err(_) => Ok(VerifyOutcome::TimedOut),
        }
    }

    /// Arms (`on = true`) or disarms (`on = false`) a termination action.
    ///
    /// Arming flips the shutdown flag immediately so scheduling excludes
    /// this session; the action itself fires after `delay` (or inline for a
    /// zero delay), either as an administrative message over the channel or
    /// as a signal through the facade.
    pub fn set_shutdown_timer(
        self: &Arc<Self>,
        control: Arc<dyn ProcessControl>,
        mode: ShutdownMode,
        delay: Duration,
        on: bool,
    ) -> Result<()> {
        let previous = self.locked().shutdown_timer.take();
        if let Some(timer) = previous {
            timer.abort();
        }

        if !on {
            let mut inner = self.locked();
            inner.shutdown_requested = false;
            if inner.status == SessionStatus::ShutdownRequested {
                inner.status = if inner.valid {
                    SessionStatus::Valid
                } else {
                    SessionStatus::Unvalidated
                };
            }
            inner.touch();
            return Ok(());
        }

        {
            let mut inner = self.locked();
            inner.shutdown_requested = true;
            if !inner.status.reclaimable() {
                inner.status = SessionStatus::ShutdownRequested;
            }
            inner.touch();
        }

        if delay.is_zero() {
            return self.fire_shutdown(control.as_ref(), mode);
        }

        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(proxy) = weak.upgrade() {
                if let Err(e) = proxy.fire_shutdown(control.as_ref(), mode) {
                    tracing::warn!(session = proxy.id(), error = %e, "armed shutdown failed");
                }
            }
        })
        .abort_handle();
        self.locked().shutdown_timer = Some(handle);
        Ok(())
    }

    fn fire_shutdown(&self, control: &dyn ProcessControl, mode: ShutdownMode) -> Result<()> {
        match mode {
            ShutdownMode::Message => {
                let channel = self
                    .locked()
                    .channel
                    .clone()
                    .with_context(|| format!("session {} has no transport channel", self.id))?;
                channel.send(Frame::shutdown())
            }
            ShutdownMode::Signal => {
                let pid = self
                    .locked()
                    .pid
                    .with_context(|| format!("session {} has no registered process", self.id))?;
                control.send_signal(pid, SignalKind::Terminate)?;
                Ok(())
            }
        }
    }

    /// Terminates the controlled process: graceful signal, bounded wait,
    /// forceful escalation if the grace period expires. The proxy is marked
    /// invalid on every path that reaches the process; a rejected signal
    /// leaves the proxy unchanged.
    pub async fn terminate(
        &self,
        control: &dyn ProcessControl,
        grace: Duration,
    ) -> Result<TerminateOutcome, ControlError> {
        let pid = self.locked().pid;
        let Some(pid) = pid else {
            // No controlled process; the slot is reclaimable immediately.
            self.mark_terminated();
            return Ok(TerminateOutcome::Exited);
        };

        match control.send_signal(pid, SignalKind::Terminate) {
            Ok(()) => {}
            Err(ControlError::NoSuchProcess) => {
                self.mark_terminated();
                return Ok(TerminateOutcome::Exited);
            }
            Err(e) => return Err(e),
        }

        if control.wait_exit(pid, grace).await == ExitWait::Exited {
            self.mark_terminated();
            return Ok(TerminateOutcome::Exited);
        }

        match control.send_signal(pid, SignalKind::Kill) {
            Ok(()) | Err(ControlError::NoSuchProcess) => {}
            Err(e) => {
                tracing::warn!(session = self.id, error = %e, "forceful kill failed");
            }
        }
        let confirmed = control.wait_exit(pid, KILL_CONFIRM_TIMEOUT).await == ExitWait::Exited;

        // Reclaim the slot either way; an unconfirmed exit must not wedge it.
        self.mark_terminated();
        Ok(if confirmed {
            TerminateOutcome::Forced
        } else {
            TerminateOutcome::TimedOut
        })
    }

    fn mark_terminated(&self) {
        let timer = {
            let mut inner = self.locked();
            inner.status = SessionStatus::Terminated;
            inner.valid = false;
            inner.shutdown_requested = true;
            inner.touch();
            inner.shutdown_timer.take()
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// Adjusts the controlled process priority by a relative delta. The
    /// recorded default scheduling parameters are never altered, so the
    /// change stays reversible; an OS rejection changes nothing.
    pub fn change_priority(
        &self,
        control: &dyn ProcessControl,
        delta: i32,
    ) -> Result<(), ControlError> {
        match self.locked().pid {
            Some(pid) => control.change_priority(pid, delta),
            None => Err(ControlError::NoSuchProcess),
        }
    }

    /// Switches the controlled process to the round-robin scheduling class,
    /// or back to its recorded default.
    pub fn set_sched_round_robin(
        &self,
        control: &dyn ProcessControl,
        on: bool,
    ) -> Result<(), ControlError> {
        let (pid, default_sched, default_priority) = {
            let inner = self.locked();
            (inner.pid, inner.default_sched, inner.default_sched_priority)
        };
        let Some(pid) = pid else {
            return Err(ControlError::NoSuchProcess);
        };

        if on {
            control.set_scheduling_policy(pid, SchedPolicy::RoundRobin, ROUND_ROBIN_PRIORITY)?;
            self.locked().sched = SchedPolicy::RoundRobin;
        } else {
            control.set_scheduling_policy(pid, default_sched, default_priority)?;
            self.locked().sched = default_sched;
        }
        Ok(())
    }

    /// Sets the workload-scaling factor (parts per thousand), clamped to
    /// the configured floor, optionally relaying it to the worker process.
    pub fn set_inflate(&self, inflate: i32, sendover: bool) -> Result<()> {
        let (clamped, channel) = {
            let mut inner = self.locked();
            let clamped = inflate.max(inner.inflate_floor);
            inner.inflate = clamped;
            inner.touch();
            let channel = if sendover { inner.channel.clone() } else { None };
            (clamped, channel)
        };

        if sendover {
            let channel = channel
                .with_context(|| format!("session {} has no transport channel", self.id))?;
            channel.send(Frame::set_inflate(clamped))?;
        }
        Ok(())
    }

    /// Returns the proxy to a reusable blank state: all payload buffers
    /// released, client and worker collections cleared, identity and status
    /// fields reset. The session id is the slot identity and survives.
    pub fn reset(&self) {
        let timer = {
            let mut inner = self.locked();
            let timer = inner.shutdown_timer.take();
            *inner = ProxyInner::blank();
            timer
        };
        if let Some(timer) = timer {
            timer.abort();
        }
    }

    /// Copies the observable state out under a single lock acquisition.
    pub fn snapshot(&self) -> ProxySnapshot {
        let inner = self.locked();
        ProxySnapshot {
            id: self.id,
            tag: inner.tag.clone(),
            client: inner.client.clone(),
            alias: inner.alias.clone(),
            ordinal: inner.ordinal.clone(),
            role: inner.role,
            status: inner.status,
            valid: inner.valid,
            shutdown_requested: inner.shutdown_requested,
            pid: inner.pid,
            clients: inner.clients.valid_count(),
            workers: inner.workers.snapshot(),
            inflate: inner.inflate,
            frac_eff: inner.frac_eff,
            updated_at: inner.updated_at.clone(),
        }
    }

    /// Whether the registry may recycle this slot for a new session.
    pub fn reclaimable(&self) -> bool {
        let inner = self.locked();
        inner.status.reclaimable() && !inner.valid && inner.clients.valid_count() == 0
    }
}

impl std::fmt::Debug for SessionProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.locked();
        f.debug_struct("SessionProxy")
            .field("id", &self.id)
            .field("tag", &inner.tag)
            .field("status", &inner.status)
            .field("valid", &inner.valid)
            .field("pid", &inner.pid)
            .finish_non_exhaustive()
    }
}
