//! Protocol types for the coordinator control socket.
//!
//! All communication uses newline-delimited JSON (one JSON object per line).
//! Connections are persistent with multiple request/response exchanges per
//! connection. A connection that sends `WorkerHello` becomes the transport
//! channel of its session and from then on receives [`WorkerFrame`]s.

use serde::{Deserialize, Serialize};

use crate::session::{ProxySnapshot, SessionRole, ShutdownMode};
use crate::transport::{Frame, FrameKind};

fn default_verify_timeout_ms() -> u64 {
    5000
}

fn default_on() -> bool {
    true
}

/// Messages sent from clients (and worker processes) to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Admit a new session; the issuing connection becomes its parent.
    Admit {
        client: String,
        #[serde(default)]
        alias: String,
        /// Caller-supplied tag; generated when absent.
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        role: SessionRole,
        #[serde(default)]
        group: Option<String>,
        #[serde(default)]
        stream_id: u16,
    },
    /// Attach the issuing connection to an existing session.
    Attach { session: usize, stream_id: u16 },
    /// Release a previously issued attachment handle.
    Detach {
        session: usize,
        slot: usize,
        generation: u64,
    },
    AddWorker { session: usize, worker: String },
    RemoveWorker { session: usize, worker: String },
    /// Relative priority change for the session's worker process.
    SetPriority { session: usize, delta: i32 },
    /// Workload-scaling factor in parts per thousand.
    SetInflate {
        session: usize,
        inflate: i32,
        #[serde(default)]
        sendover: bool,
    },
    SetSchedRoundRobin { session: usize, on: bool },
    /// Liveness probe with a bounded wait for the worker's reply.
    Verify {
        session: usize,
        #[serde(default = "default_verify_timeout_ms")]
        timeout_ms: u64,
    },
    /// Arm or disarm a delayed termination action.
    ShutdownTimer {
        session: usize,
        #[serde(default)]
        mode: ShutdownMode,
        #[serde(default)]
        delay_secs: u64,
        #[serde(default = "default_on")]
        on: bool,
    },
    Terminate { session: usize },
    /// Request list of all sessions.
    List,
    /// Request coordinator shutdown.
    Shutdown,
    /// Sent by a worker process: bind this connection as the session's
    /// transport channel.
    WorkerHello {
        session: usize,
        pid: i32,
        #[serde(default)]
        ordinal: String,
        #[serde(default)]
        protocol_version: u8,
    },
    /// Sent by a worker process in answer to a ping frame.
    PingReply { session: usize },
}

/// Messages sent from the coordinator to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DaemonMessage {
    /// Acknowledgement with the coordinator's build SHA.
    Ack { build_sha: String },
    Admitted { session: usize, tag: String },
    Attached {
        session: usize,
        slot: usize,
        generation: u64,
        stream_id: u16,
    },
    VerifyResult { responsive: bool },
    TerminateResult { outcome: String },
    /// List of all sessions.
    Sessions(Vec<SessionSummary>),
    /// Coordinator is going down (sent before shutdown).
    Stopping { build_sha: String },
    /// Error response.
    Error(String),
}

/// Frames relayed to a worker process connection, the JSON rendering of
/// [`Frame`]. Binary payloads travel base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerFrame {
    Ping,
    Shutdown,
    SetInflate { inflate: i32 },
    Data { stream_id: u16, payload: String },
}

impl WorkerFrame {
    pub fn from_frame(frame: &Frame) -> Self {
        match frame.kind {
            FrameKind::Ping => WorkerFrame::Ping,
            FrameKind::Shutdown => WorkerFrame::Shutdown,
            FrameKind::SetInflate => {
                let inflate = frame
                    .payload
                    .as_slice()
                    .try_into()
                    .map(i32::from_be_bytes)
                    .unwrap_or_default();
                WorkerFrame::SetInflate { inflate }
            }
            FrameKind::Data => WorkerFrame::Data {
                stream_id: frame.stream_id,
                payload: base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    &frame.payload,
                ),
            },
        }
    }
}

/// One session in the coordinator's status surface and registry snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: usize,
    pub tag: String,
    pub client: String,
    pub alias: String,
    pub ordinal: String,
    pub role: SessionRole,
    /// Human-readable lifecycle state.
    pub status: String,
    pub pid: Option<i32>,
    pub clients: usize,
    pub workers: Vec<String>,
    pub inflate: i32,
    pub frac_eff: f32,
    /// Timestamp of last state update (RFC3339).
    pub updated_at: String,
}

impl From<ProxySnapshot> for SessionSummary {
    fn from(snapshot: ProxySnapshot) -> Self {
        Self {
            session: snapshot.id,
            tag: snapshot.tag,
            client: snapshot.client,
            alias: snapshot.alias,
            ordinal: snapshot.ordinal,
            role: snapshot.role,
            status: snapshot.status.as_str().to_string(),
            pid: snapshot.pid,
            clients: snapshot.clients,
            workers: snapshot
                .workers
                .into_iter()
                .map(|w| w.as_str().to_string())
                .collect(),
            inflate: snapshot.inflate,
            frac_eff: snapshot.frac_eff,
            updated_at: snapshot.updated_at,
        }
    }
}

/// On-disk registry snapshot, written at an interval and on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub host: String,
    pub build_sha: String,
    /// Timestamp of the write (RFC3339).
    pub saved_at: String,
    pub sessions: Vec<SessionSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::Verify {
            session: 3,
            timeout_ms: 250,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("Verify"));

        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            ClientMessage::Verify {
                session,
                timeout_ms,
            } => {
                assert_eq!(session, 3);
                assert_eq!(timeout_ms, 250);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_verify_timeout_defaults() {
        let parsed: ClientMessage =
            serde_json::from_str("{\"type\": \"Verify\", \"session\": 0}").unwrap();
        match parsed {
            ClientMessage::Verify { timeout_ms, .. } => assert_eq!(timeout_ms, 5000),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_shutdown_timer_defaults_to_armed() {
        let parsed: ClientMessage =
            serde_json::from_str("{\"type\": \"ShutdownTimer\", \"session\": 1}").unwrap();
        match parsed {
            ClientMessage::ShutdownTimer {
                mode,
                delay_secs,
                on,
                ..
            } => {
                assert_eq!(mode, ShutdownMode::Message);
                assert_eq!(delay_secs, 0);
                assert!(on);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_daemon_message_serialization() {
        let msg = DaemonMessage::Ack {
            build_sha: "abc123".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("Ack"));

        let parsed: DaemonMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            DaemonMessage::Ack { build_sha } => assert_eq!(build_sha, "abc123"),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_worker_frame_from_ping() {
        let frame = WorkerFrame::from_frame(&Frame::ping());
        assert!(matches!(frame, WorkerFrame::Ping));
    }

    #[test]
    fn test_worker_frame_decodes_inflate_payload() {
        let frame = WorkerFrame::from_frame(&Frame::set_inflate(1250));
        match frame {
            WorkerFrame::SetInflate { inflate } => assert_eq!(inflate, 1250),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_worker_frame_encodes_data_as_base64() {
        let frame = WorkerFrame::from_frame(&Frame::data(4, vec![0xde, 0xad]));
        match frame {
            WorkerFrame::Data { stream_id, payload } => {
                assert_eq!(stream_id, 4);
                assert_eq!(payload, "3q0=");
            }
            _ => panic!("Wrong variant"),
        }
    }
}
