//! The streaming transport boundary and its WebSocket implementation.

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::protocol::{CloseFrame, Message, frame::coding::CloseCode},
};
use tracing::debug;
use url::Url;

/// Close codes with special meaning to the session state machine.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const NO_STATUS: u16 = 1005;
    pub const ABNORMAL: u16 = 1006;
}

/// Code and reason carried by a close signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    pub fn normal(reason: impl Into<String>) -> Self {
        Self::new(close_code::NORMAL, reason)
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(close_code::ABNORMAL, reason)
    }

    /// Normal closure and going-away are deliberate; anything else is retried.
    pub fn is_clean(&self) -> bool {
        matches!(self.code, close_code::NORMAL | close_code::GOING_AWAY)
    }
}

/// An outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<serde_json::Value> for Frame {
    fn from(value: serde_json::Value) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

/// Something the transport delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Binary(Bytes),
    /// A transport error. Does not by itself end the connection.
    Error(String),
    /// The connection is gone. Nothing follows this event.
    Closed(CloseReason),
}

/// Write half of an open transport.
#[async_trait]
pub trait TransportSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;
    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError>;
}

/// Read half of an open transport.
#[async_trait]
pub trait TransportStream: Send {
    /// Next event. Must be cancel-safe: it is polled inside `select!`.
    async fn next_event(&mut self) -> TransportEvent;
}

/// Both halves of a freshly opened transport.
pub struct TransportLink {
    pub sink: Box<dyn TransportSink>,
    pub stream: Box<dyn TransportStream>,
}

/// Opens transports. Resolves once the transport is open.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: Url) -> Result<TransportLink, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Connector`] backed by `tokio-tungstenite`.
#[derive(Debug, Default, Clone)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: Url) -> Result<TransportLink, TransportError> {
        let (ws_stream, response) = connect_async(url.as_str()).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");
        let (sink, stream) = ws_stream.split();
        Ok(TransportLink {
            sink: Box::new(TungsteniteSink { sink }),
            stream: Box::new(TungsteniteStream {
                stream,
                deferred_close: None,
            }),
        })
    }
}

struct TungsteniteSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl TransportSink for TungsteniteSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data),
        };
        self.sink.send(message).await?;
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(reason.code),
            reason: reason.reason.into(),
        };
        self.sink.send(Message::Close(Some(frame))).await?;
        self.sink.close().await?;
        Ok(())
    }
}

struct TungsteniteStream {
    stream: SplitStream<WsStream>,
    deferred_close: Option<CloseReason>,
}

#[async_trait]
impl TransportStream for TungsteniteStream {
    async fn next_event(&mut self) -> TransportEvent {
        if let Some(reason) = self.deferred_close.take() {
            return TransportEvent::Closed(reason);
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(data))) => return TransportEvent::Binary(data),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| CloseReason::new(u16::from(f.code), f.reason.to_string()))
                        .unwrap_or_else(|| CloseReason::new(close_code::NO_STATUS, ""));
                    return TransportEvent::Closed(reason);
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(e)) => {
                    // A read error ends the stream; report it, then the close.
                    self.deferred_close = Some(CloseReason::abnormal(e.to_string()));
                    return TransportEvent::Error(e.to_string());
                }
                None => return TransportEvent::Closed(CloseReason::abnormal("Connection dropped")),
            }
        }
    }
}
