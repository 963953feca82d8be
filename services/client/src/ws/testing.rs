//! In-memory transport used by the session tests.

use super::{
    events::SessionEvent,
    transport::{
        CloseReason, Connector, Frame, TransportEvent, TransportLink, TransportSink,
        TransportStream,
    },
};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::pending;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// How the next transport open behaves.
#[derive(Debug, Clone)]
pub(crate) enum OpenMode {
    Accept,
    Refuse(String),
    Hang,
    Delay(Duration),
}

/// Something the client wrote to a mock transport.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Sent {
    Frame(Frame),
    Close(CloseReason),
}

impl Sent {
    /// The JSON body of a text frame.
    pub(crate) fn json(&self) -> serde_json::Value {
        match self {
            Sent::Frame(Frame::Text(text)) => serde_json::from_str(text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

struct Script {
    modes: VecDeque<OpenMode>,
    fallback: OpenMode,
    attempts: usize,
}

/// Connector whose opens follow a script and whose transports are driven
/// by a [`MockServer`] handed to the test.
#[derive(Clone)]
pub(crate) struct MockConnector {
    script: Arc<Mutex<Script>>,
    log: Arc<Mutex<Vec<String>>>,
    servers: mpsc::UnboundedSender<MockServer>,
}

impl MockConnector {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            script: Arc::new(Mutex::new(Script {
                modes: VecDeque::new(),
                fallback: OpenMode::Accept,
                attempts: 0,
            })),
            log: Arc::new(Mutex::new(Vec::new())),
            servers,
        };
        (connector, accepted)
    }

    /// Queue the behaviour of upcoming opens, in order.
    pub(crate) fn script(&self, modes: impl IntoIterator<Item = OpenMode>) {
        self.script.lock().modes.extend(modes);
    }

    /// Behaviour once the script runs out.
    pub(crate) fn fallback(&self, mode: OpenMode) {
        self.script.lock().fallback = mode;
    }

    pub(crate) fn attempts(&self) -> usize {
        self.script.lock().attempts
    }

    /// `open <path>` and `close <code>` entries in the order they happened.
    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: Url) -> Result<TransportLink, TransportError> {
        let mode = {
            let mut script = self.script.lock();
            script.attempts += 1;
            let fallback = script.fallback.clone();
            script.modes.pop_front().unwrap_or(fallback)
        };
        match mode {
            OpenMode::Accept => {}
            OpenMode::Refuse(reason) => return Err(TransportError::WebSocket(reason)),
            OpenMode::Hang => pending::<()>().await,
            OpenMode::Delay(delay) => tokio::time::sleep(delay).await,
        }

        self.log.lock().push(format!("open {}", url.path()));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let fail_sends = Arc::new(AtomicBool::new(false));
        let link = TransportLink {
            sink: Box::new(MockSink {
                outbound: outbound_tx,
                fail_sends: fail_sends.clone(),
                log: self.log.clone(),
            }),
            stream: Box::new(MockStream { inbound: inbound_rx }),
        };
        let _ = self.servers.send(MockServer {
            url,
            inbound: inbound_tx,
            outbound: outbound_rx,
            fail_sends,
        });
        Ok(link)
    }
}

/// The far end of one mock transport.
pub(crate) struct MockServer {
    pub(crate) url: Url,
    inbound: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Sent>,
    fail_sends: Arc<AtomicBool>,
}

impl MockServer {
    pub(crate) fn push(&self, event: TransportEvent) {
        let _ = self.inbound.send(event);
    }

    pub(crate) fn send_json(&self, body: serde_json::Value) {
        self.push(TransportEvent::Text(body.to_string()));
    }

    pub(crate) fn send_text(&self, text: &str) {
        self.push(TransportEvent::Text(text.to_string()));
    }

    pub(crate) fn send_binary(&self, data: Bytes) {
        self.push(TransportEvent::Binary(data));
    }

    pub(crate) fn close(&self, code: u16, reason: &str) {
        self.push(TransportEvent::Closed(CloseReason::new(code, reason)));
    }

    /// Next thing the client wrote. Panics if the client side was dropped.
    pub(crate) async fn next_sent(&mut self) -> Sent {
        self.outbound.recv().await.expect("client side dropped")
    }

    pub(crate) fn try_sent(&mut self) -> Option<Sent> {
        self.outbound.try_recv().ok()
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

struct MockSink {
    outbound: mpsc::UnboundedSender<Sent>,
    fail_sends: Arc<AtomicBool>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::WebSocket("broken pipe".to_string()));
        }
        let _ = self.outbound.send(Sent::Frame(frame));
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        self.log.lock().push(format!("close {}", reason.code));
        let _ = self.outbound.send(Sent::Close(reason));
        Ok(())
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl TransportStream for MockStream {
    async fn next_event(&mut self) -> TransportEvent {
        match self.inbound.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed(CloseReason::abnormal("mock server dropped")),
        }
    }
}

/// Collects `(name, event)` pairs for every listed event name.
pub(crate) fn record(
    connection: &super::SessionConnection,
    names: &[&'static str],
) -> mpsc::UnboundedReceiver<(&'static str, SessionEvent)> {
    let (tx, rx) = mpsc::unbounded_channel();
    for &name in names {
        let tx = tx.clone();
        connection.on(name, move |event| {
            let _ = tx.send((name, event.clone()));
            Ok(())
        });
    }
    rx
}

/// Drain everything recorded so far.
pub(crate) fn drain(
    rx: &mut mpsc::UnboundedReceiver<(&'static str, SessionEvent)>,
) -> Vec<(&'static str, SessionEvent)> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
