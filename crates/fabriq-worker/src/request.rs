use std::fmt;
use std::net::SocketAddr;

use bytes::Bytes;
use fabriq_envelope::Envelope;

use crate::error::WorkerError;

/// Reserved command name treated as a protocol-level liveness probe.
///
/// A single-frame envelope carrying only this value is answered by
/// nothing: no dispatch lookup, no warning, no reply.
pub const LIVENESS_PROBE: &str = "HEARTBEAT";

/// Transport-assigned identifier of one service connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The routing prefix of a request: which connection it arrived on.
///
/// Attached by the service endpoint, carried — never parsed — by
/// application code, and reattached to replies so the transport can
/// route them back to the same peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    id: ConnectionId,
    addr: SocketAddr,
}

impl Origin {
    pub(crate) fn new(id: ConnectionId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    /// The connection identifier.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The peer's socket address, for diagnostics.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.addr, self.id)
    }
}

/// One decoded client request: origin, command name, payload frames.
#[derive(Debug, Clone)]
pub struct Request {
    origin: Origin,
    command: String,
    payload: Vec<Bytes>,
}

impl Request {
    /// Decode a request from a wire envelope: frame 0 is the command
    /// name (UTF-8), the remaining frames are opaque payload.
    pub(crate) fn from_envelope(origin: Origin, envelope: Envelope) -> Result<Self, WorkerError> {
        let mut frames = envelope.into_frames();
        if frames.is_empty() {
            return Err(WorkerError::Malformed("envelope has no frames".to_string()));
        }
        let command_frame = frames.remove(0);
        let command = std::str::from_utf8(&command_frame)
            .map_err(|_| WorkerError::Malformed("command name is not UTF-8".to_string()))?
            .to_string();

        Ok(Self {
            origin,
            command,
            payload: frames,
        })
    }

    /// The command name.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// The payload frames, in order.
    pub fn payload(&self) -> &[Bytes] {
        &self.payload
    }

    /// The routing prefix.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// Build a reply to this request. The origin is carried over
    /// unmodified, so the transport can deliver it to the requester.
    pub fn reply(&self, frames: Vec<Bytes>) -> Reply {
        Reply {
            origin: self.origin,
            envelope: Envelope::from_frames(frames),
        }
    }

    /// Whether this is the reserved liveness sentinel.
    pub(crate) fn is_liveness_probe(&self) -> bool {
        self.command == LIVENESS_PROBE && self.payload.is_empty()
    }
}

/// One outgoing reply envelope plus the routing prefix it belongs to.
///
/// Ownership transfers into the relay on enqueue; the relay and loop
/// forward the bytes without inspecting them.
#[derive(Debug, Clone)]
pub struct Reply {
    origin: Origin,
    envelope: Envelope,
}

impl Reply {
    /// Build a reply addressed to `origin`.
    pub fn new(origin: Origin, frames: Vec<Bytes>) -> Self {
        Self {
            origin,
            envelope: Envelope::from_frames(frames),
        }
    }

    /// The routing prefix.
    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// The reply envelope.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

#[cfg(test)]
pub(crate) fn test_request(command: &str) -> Request {
    Request {
        origin: Origin::new(ConnectionId::new(0), "127.0.0.1:0".parse().unwrap()),
        command: command.to_string(),
        payload: Vec::new(),
    }
}
