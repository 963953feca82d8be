//! Error types surfaced by the session client.

use std::time::Duration;

/// Why a `connect()` (or another handle call) was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("No authentication credential is available")]
    MissingCredential,
    #[error("Invalid session URL: {0}")]
    InvalidUrl(String),
    #[error("Transport failed to open: {0}")]
    Transport(String),
    #[error("Transport did not open within {0:?}")]
    ConnectTimeout(Duration),
    #[error("Connection attempt was superseded by a different target")]
    Superseded,
    #[error("Connection attempt was cancelled by disconnect")]
    Disconnected,
    #[error("Failed to encode outbound message: {0}")]
    Encode(String),
    #[error("Session driver is no longer running")]
    DriverStopped,
}

/// Failures reported by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),
    #[error("Transport is not connected")]
    NotConnected,
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}
