//! Transport-side handles linking the session core to live connections.
//!
//! A [`ClientConn`] is the identity of one connected control client; session
//! proxies reference it weakly, so a dropped connection invalidates its
//! attachments without any teardown protocol. A [`SessionChannel`] is the
//! outbound frame queue of a worker-process connection; the proxy clones the
//! sender half under its lock and performs the actual send after release.

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

/// One connected control client. Proxies hold `Weak` references only; the
/// accept loop owns the `Arc` for the lifetime of the connection task.
#[derive(Debug)]
pub struct ClientConn {
    id: u64,
    peer: String,
    connected_at: String,
}

impl ClientConn {
    pub fn new(id: u64, peer: impl Into<String>) -> Self {
        Self {
            id,
            peer: peer.into(),
            connected_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// RFC3339 timestamp of when the connection was accepted.
    pub fn connected_at(&self) -> &str {
        &self.connected_at
    }
}

/// Control frames relayed to a worker process connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Liveness probe; the worker answers with a ping reply.
    Ping,
    /// Administrative shutdown request.
    Shutdown,
    /// New inflate factor, payload is a big-endian i32.
    SetInflate,
    /// Opaque payload for the stream identified by `stream_id`.
    Data,
}

/// One outbound frame on a session's worker channel.
#[derive(Debug, Clone)]
pub struct Frame {
    pub kind: FrameKind,
    pub stream_id: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn ping() -> Self {
        Self {
            kind: FrameKind::Ping,
            stream_id: 0,
            payload: Vec::new(),
        }
    }

    pub fn shutdown() -> Self {
        Self {
            kind: FrameKind::Shutdown,
            stream_id: 0,
            payload: Vec::new(),
        }
    }

    pub fn set_inflate(inflate: i32) -> Self {
        Self {
            kind: FrameKind::SetInflate,
            stream_id: 0,
            payload: inflate.to_be_bytes().to_vec(),
        }
    }

    pub fn data(stream_id: u16, payload: Vec<u8>) -> Self {
        Self {
            kind: FrameKind::Data,
            stream_id,
            payload,
        }
    }
}

/// Cloneable sender half of a worker connection's outbound queue.
///
/// Sends never block; the connection task drains the receiver half and does
/// the socket I/O.
#[derive(Debug, Clone)]
pub struct SessionChannel {
    tx: mpsc::UnboundedSender<Frame>,
}

impl SessionChannel {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, frame: Frame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| anyhow!("worker transport channel closed"))
    }
}

/// Response formatter for one attach point on a session.
///
/// Owns nothing but a channel clone and the stream id it speaks for; the
/// proxy hands it prepared buffers and never parses wire bytes itself.
#[derive(Debug, Clone)]
pub struct Responder {
    channel: SessionChannel,
    stream_id: u16,
}

impl Responder {
    pub fn new(channel: SessionChannel, stream_id: u16) -> Self {
        Self { channel, stream_id }
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    /// Relays an already-formatted payload to the worker connection.
    pub fn send_bytes(&self, payload: Vec<u8>) -> Result<()> {
        self.channel.send(Frame::data(self.stream_id, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivers_frames_in_order() {
        let (channel, mut rx) = SessionChannel::new();
        channel.send(Frame::ping()).unwrap();
        channel.send(Frame::set_inflate(1500)).unwrap();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, FrameKind::Ping);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, FrameKind::SetInflate);
        assert_eq!(second.payload, 1500i32.to_be_bytes().to_vec());
    }

    #[test]
    fn test_send_fails_once_receiver_dropped() {
        let (channel, rx) = SessionChannel::new();
        drop(rx);
        assert!(channel.send(Frame::ping()).is_err());
    }

    #[test]
    fn test_responder_tags_frames_with_stream_id() {
        let (channel, mut rx) = SessionChannel::new();
        let responder = Responder::new(channel, 7);
        responder.send_bytes(vec![1, 2, 3]).unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.kind, FrameKind::Data);
        assert_eq!(frame.stream_id, 7);
        assert_eq!(frame.payload, vec![1, 2, 3]);
    }
}
