//! Events published by a [`SessionConnection`](super::SessionConnection).

use super::protocol::{InboundMessage, SessionTarget, TranscriptUpdate};
use super::session::ConnectionState;
use bytes::Bytes;

pub const CONNECTED: &str = "connected";
pub const DISCONNECTED: &str = "disconnected";
pub const ERROR: &str = "error";
pub const MESSAGE: &str = "message";
pub const TRANSCRIPT: &str = "transcript";
pub const AUDIO_RECEIVED: &str = "audio-received";
pub const RECONNECT_FAILED: &str = "reconnect-failed";
pub const SEND_ERROR: &str = "send-error";
pub const PARSE_ERROR: &str = "parse-error";
pub const STATE_CHANGED: &str = "state-changed";
pub const HEALTH: &str = "health";

/// Where an `error` event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSource {
    Transport,
    Protocol,
    Server,
    Handshake,
}

impl ErrorSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Server => "server",
            Self::Handshake => "handshake",
        }
    }
}

/// Payload delivered to event handlers.
///
/// Subscribe by name: the constants in this module, or the `type` of any
/// inbound message for the per-type pass-through.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { target: SessionTarget },
    Disconnected { code: u16, reason: String },
    Error {
        message: String,
        source: Option<ErrorSource>,
    },
    /// An inbound message, delivered under `message` and under its own type.
    Message(InboundMessage),
    Transcript(TranscriptUpdate),
    AudioReceived { message_id: String, data: Bytes },
    ReconnectFailed { attempts: u32 },
    SendError { message: String },
    ParseError { message: String, raw: String },
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },
    /// Result of a liveness probe. Advisory only.
    Health {
        healthy: bool,
        detail: Option<String>,
    },
}
