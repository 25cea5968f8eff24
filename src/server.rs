//! Coordinator server implementation.
//!
//! Accepts connections on a Unix socket and speaks the newline-delimited
//! JSON protocol from `protocol.rs`. Every connection starts as a control
//! client; a `WorkerHello` upgrades it into the transport channel of its
//! session, after which the connection task relays queued frames out and
//! ping replies in.
//!
//! Client attachments reference the connection object weakly, so a
//! connection that drops invalidates its slots without any teardown
//! protocol.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};

use crate::build_info::BUILD_SHA;
use crate::config::CoordinatorConfig;
use crate::daemon_log::daemon_log;
use crate::paths;
use crate::process::{ProcessControl, SchedPolicy, UnixProcessControl};
use crate::protocol::{ClientMessage, DaemonMessage, WorkerFrame};
use crate::session::{
    run_ping_supervisor, AdmitRequest, ClientId, SessionProxy, SessionRegistry,
};
use crate::transport::{ClientConn, Frame, SessionChannel};

/// Shared server state.
struct Coordinator {
    registry: Arc<SessionRegistry>,
    control: Arc<dyn ProcessControl>,
    config: CoordinatorConfig,
    shutdown_tx: broadcast::Sender<()>,
    shutting_down: AtomicBool,
    next_conn_id: AtomicU64,
}

impl Coordinator {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

/// Outcome of one request: either a plain reply, or a reply followed by an
/// upgrade of the connection into a session's worker transport.
enum Handled {
    Reply(DaemonMessage),
    Worker {
        proxy: Arc<SessionProxy>,
        frames: mpsc::UnboundedReceiver<Frame>,
    },
}

/// Runs the coordinator until a `Shutdown` request arrives.
pub async fn run_coordinator(config: CoordinatorConfig) -> Result<()> {
    // Singleton enforcement: advisory lock first, so a racing second
    // coordinator loses before touching the socket.
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(paths::lock_path()?)
        .context("Failed to open coordinator lock file")?;
    if lock_file.try_lock_exclusive().is_err() {
        bail!("Another coordinator is already running");
    }

    let pid_path = paths::pid_path()?;
    std::fs::write(&pid_path, std::process::id().to_string())
        .context("Failed to write pid file")?;
    let sha_path = paths::build_sha_path()?;
    std::fs::write(&sha_path, BUILD_SHA).context("Failed to write build SHA file")?;

    let registry = Arc::new(SessionRegistry::new(&config));
    let registry_path = paths::registry_path()?;
    match registry.load_from(&registry_path) {
        Ok(0) => {}
        Ok(n) => eprintln!("[farmd] Loaded {} session(s) from previous instance", n),
        Err(e) => eprintln!("[farmd] Warning: Failed to load registry: {}", e),
    }

    let socket_path = config.socket_path()?;
    if socket_path.exists() {
        // Try connecting to see if another coordinator is bound despite the
        // lock (e.g. one holding a different home directory).
        if UnixStream::connect(&socket_path).await.is_ok() {
            bail!("Another coordinator is already running");
        }
        std::fs::remove_file(&socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(&socket_path).context("Failed to bind Unix socket")?;
    eprintln!(
        "[farmd] Listening on {} (host {})",
        socket_path.display(),
        gethostname::gethostname().to_string_lossy()
    );

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
    let coordinator = Arc::new(Coordinator {
        registry: registry.clone(),
        control: Arc::new(UnixProcessControl::new()),
        config: config.clone(),
        shutdown_tx: shutdown_tx.clone(),
        shutting_down: AtomicBool::new(false),
        next_conn_id: AtomicU64::new(1),
    });

    // Registry snapshot persistence task.
    let persist_coordinator = coordinator.clone();
    let persist_path = registry_path.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(persist_coordinator.config.persist_interval());
        loop {
            interval.tick().await;
            if persist_coordinator.is_shutting_down() {
                break;
            }
            if let Err(e) = persist_coordinator.registry.persist_to(&persist_path) {
                eprintln!("[farmd] Warning: Failed to persist registry: {}", e);
            }
        }
    });

    // Liveness supervisor task.
    let supervisor = tokio::spawn(run_ping_supervisor(
        registry.clone(),
        coordinator.control.clone(),
        config,
    ));

    // Accept connections until shutdown is requested.
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;
                if coordinator.is_shutting_down() {
                    break;
                }
                let conn_coordinator = coordinator.clone();
                tokio::spawn(async move {
                    handle_connection(stream, conn_coordinator).await;
                });
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    supervisor.abort();

    // Final persist before exit.
    if let Err(e) = registry.persist_to(&registry_path) {
        eprintln!("[farmd] Warning: Failed to persist registry: {}", e);
    }

    let _ = std::fs::remove_file(&socket_path);
    let _ = std::fs::remove_file(&pid_path);
    let _ = std::fs::remove_file(&sha_path);
    Ok(())
}

/// One connection task: control request/response loop until EOF, shutdown,
/// or an upgrade into a worker transport.
async fn handle_connection(stream: UnixStream, coordinator: Arc<Coordinator>) {
    let conn_id = coordinator.next_conn_id.fetch_add(1, Ordering::SeqCst);
    let conn = Arc::new(ClientConn::new(conn_id, format!("uds-{}", conn_id)));
    daemon_log("server", &format!("connection {} accepted", conn_id));

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut shutdown_rx = coordinator.shutdown_tx.subscribe();

    loop {
        let mut line = String::new();

        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let handled = handle_message(&line, &conn, &coordinator).await;
                        let response = match &handled {
                            Handled::Reply(response) => response.clone(),
                            Handled::Worker { proxy, .. } => {
                                daemon_log(
                                    "server",
                                    &format!(
                                        "connection {} upgraded to worker transport for session {}",
                                        conn_id,
                                        proxy.id()
                                    ),
                                );
                                ack()
                            }
                        };
                        let response_json = match serde_json::to_string(&response) {
                            Ok(json) => json,
                            Err(e) => {
                                eprintln!("[farmd] Failed to serialize response: {}", e);
                                continue;
                            }
                        };
                        if writer.write_all(format!("{}\n", response_json).as_bytes()).await.is_err() {
                            break;
                        }

                        if let Handled::Worker { proxy, frames } = handled {
                            run_worker_connection(reader, writer, proxy, frames, shutdown_rx).await;
                            return;
                        }
                    }
                    Err(_) => break,
                }
            }
            _ = shutdown_rx.recv() => {
                let msg = DaemonMessage::Stopping {
                    build_sha: BUILD_SHA.to_string(),
                };
                if let Ok(json) = serde_json::to_string(&msg) {
                    let _ = writer.write_all(format!("{}\n", json).as_bytes()).await;
                }
                break;
            }
        }
    }

    daemon_log("server", &format!("connection {} closed", conn_id));
}

/// Worker transport loop: relay queued frames out, deliver ping replies in.
async fn run_worker_connection(
    mut reader: BufReader<OwnedReadHalf>,
    mut writer: OwnedWriteHalf,
    proxy: Arc<SessionProxy>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        let mut line = String::new();

        tokio::select! {
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break,
                    Ok(_) => {
                        if let Ok(ClientMessage::PingReply { .. }) =
                            serde_json::from_str::<ClientMessage>(line.trim())
                        {
                            proxy.ping_reply();
                        }
                    }
                    Err(_) => break,
                }
            }
            frame = frames.recv() => {
                match frame {
                    Some(frame) => {
                        let msg = WorkerFrame::from_frame(&frame);
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(e) => {
                                eprintln!("[farmd] Failed to serialize frame: {}", e);
                                continue;
                            }
                        };
                        if writer.write_all(format!("{}\n", json).as_bytes()).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    // Transport gone: the session cannot be verified or messaged anymore.
    proxy.clear_channel();
    proxy.mark_invalid();
    daemon_log(
        "server",
        &format!("worker transport for session {} closed", proxy.id()),
    );
}

fn session_or_error(
    coordinator: &Coordinator,
    session: usize,
) -> Result<Arc<SessionProxy>, DaemonMessage> {
    coordinator
        .registry
        .get(session)
        .ok_or_else(|| DaemonMessage::Error(format!("Session not found: {}", session)))
}

fn ack() -> DaemonMessage {
    DaemonMessage::Ack {
        build_sha: BUILD_SHA.to_string(),
    }
}

/// Handles a single client message and returns the response.
async fn handle_message(
    line: &str,
    conn: &Arc<ClientConn>,
    coordinator: &Coordinator,
) -> Handled {
    let message: ClientMessage = match serde_json::from_str(line.trim()) {
        Ok(msg) => msg,
        Err(e) => {
            return Handled::Reply(DaemonMessage::Error(format!("Invalid message: {}", e)));
        }
    };

    let reply = match message {
        ClientMessage::Admit {
            client,
            alias,
            tag,
            role,
            group,
            stream_id,
        } => {
            let proxy = coordinator.registry.admit(
                AdmitRequest {
                    client,
                    alias,
                    tag,
                    role,
                    group,
                },
                Some((conn, stream_id)),
            );
            DaemonMessage::Admitted {
                session: proxy.id(),
                tag: proxy.tag(),
            }
        }

        ClientMessage::Attach { session, stream_id } => match session_or_error(coordinator, session)
        {
            Ok(proxy) => {
                let id = proxy.attach_client(conn, stream_id);
                DaemonMessage::Attached {
                    session,
                    slot: id.index(),
                    generation: id.generation(),
                    stream_id,
                }
            }
            Err(e) => e,
        },

        ClientMessage::Detach {
            session,
            slot,
            generation,
        } => match session_or_error(coordinator, session) {
            Ok(proxy) => {
                if proxy.detach_client(ClientId::new(slot, generation)) {
                    ack()
                } else {
                    DaemonMessage::Error("Stale or unknown client handle".to_string())
                }
            }
            Err(e) => e,
        },

        ClientMessage::AddWorker { session, worker } => {
            match session_or_error(coordinator, session) {
                Ok(proxy) => {
                    proxy.add_worker(crate::session::WorkerId::new(worker));
                    ack()
                }
                Err(e) => e,
            }
        }

        ClientMessage::RemoveWorker { session, worker } => {
            match session_or_error(coordinator, session) {
                Ok(proxy) => {
                    proxy.remove_worker(&crate::session::WorkerId::new(worker));
                    ack()
                }
                Err(e) => e,
            }
        }

        ClientMessage::SetPriority { session, delta } => {
            match session_or_error(coordinator, session) {
                Ok(proxy) => match proxy.change_priority(coordinator.control.as_ref(), delta) {
                    Ok(()) => ack(),
                    Err(e) => DaemonMessage::Error(format!("Priority change failed: {}", e)),
                },
                Err(e) => e,
            }
        }

        ClientMessage::SetInflate {
            session,
            inflate,
            sendover,
        } => match session_or_error(coordinator, session) {
            Ok(proxy) => match proxy.set_inflate(inflate, sendover) {
                Ok(()) => ack(),
                Err(e) => DaemonMessage::Error(format!("Inflate change failed: {}", e)),
            },
            Err(e) => e,
        },

        ClientMessage::SetSchedRoundRobin { session, on } => {
            match session_or_error(coordinator, session) {
                Ok(proxy) => {
                    match proxy.set_sched_round_robin(coordinator.control.as_ref(), on) {
                        Ok(()) => ack(),
                        Err(e) => {
                            DaemonMessage::Error(format!("Scheduling change failed: {}", e))
                        }
                    }
                }
                Err(e) => e,
            }
        }

        ClientMessage::Verify {
            session,
            timeout_ms,
        } => match session_or_error(coordinator, session) {
            Ok(proxy) => match proxy.verify(Duration::from_millis(timeout_ms)).await {
                Ok(outcome) => DaemonMessage::VerifyResult {
                    responsive: outcome.responsive(),
                },
                Err(e) => DaemonMessage::Error(format!("Verification failed: {}", e)),
            },
            Err(e) => e,
        },

        ClientMessage::ShutdownTimer {
            session,
            mode,
            delay_secs,
            on,
        } => match session_or_error(coordinator, session) {
            Ok(proxy) => match proxy.set_shutdown_timer(
                coordinator.control.clone(),
                mode,
                Duration::from_secs(delay_secs),
                on,
            ) {
                Ok(()) => ack(),
                Err(e) => DaemonMessage::Error(format!("Shutdown timer failed: {}", e)),
            },
            Err(e) => e,
        },

        ClientMessage::Terminate { session } => match session_or_error(coordinator, session) {
            Ok(proxy) => {
                match proxy
                    .terminate(
                        coordinator.control.as_ref(),
                        coordinator.config.terminate_grace(),
                    )
                    .await
                {
                    Ok(outcome) => DaemonMessage::TerminateResult {
                        outcome: outcome.as_str().to_string(),
                    },
                    Err(e) => DaemonMessage::Error(format!("Termination failed: {}", e)),
                }
            }
            Err(e) => e,
        },

        ClientMessage::List => DaemonMessage::Sessions(coordinator.registry.summaries()),

        ClientMessage::Shutdown => {
            coordinator.shutting_down.store(true, Ordering::SeqCst);
            if let Ok(path) = paths::registry_path() {
                let _ = coordinator.registry.persist_to(&path);
            }
            let _ = coordinator.shutdown_tx.send(());
            ack()
        }

        ClientMessage::WorkerHello {
            session,
            pid,
            ordinal,
            protocol_version,
        } => match session_or_error(coordinator, session) {
            Ok(proxy) => {
                let (channel, frames) = SessionChannel::new();
                proxy.set_channel(channel);
                proxy.set_pid(pid);
                proxy.set_ordinal(&ordinal);
                proxy.set_protocol_version(protocol_version);
                proxy.set_default_sched(SchedPolicy::Default, 0);
                if coordinator.config.sched_round_robin {
                    if let Err(e) =
                        proxy.set_sched_round_robin(coordinator.control.as_ref(), true)
                    {
                        tracing::warn!(session, error = %e, "round-robin switch failed");
                    }
                }
                daemon_log(
                    "server",
                    &format!("worker process {} registered for session {}", pid, session),
                );
                return Handled::Worker { proxy, frames };
            }
            Err(e) => e,
        },

        // A ping reply on a connection that was never upgraded; deliver it
        // anyway so simple test clients can answer on a second connection.
        ClientMessage::PingReply { session } => match session_or_error(coordinator, session) {
            Ok(proxy) => {
                proxy.ping_reply();
                ack()
            }
            Err(e) => e,
        },
    };

    Handled::Reply(reply)
}
