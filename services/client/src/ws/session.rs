//! The session driver: a single task that owns the transport, the outbound
//! queue, the chunk reassembler and every timer of one connection.
//!
//! All transitions happen inside [`SessionDriver::run`] in response to caller
//! commands, transport open completion, transport events or timer firings, so
//! none of the state below needs a lock.

use super::{
    events::{self, ErrorSource, SessionEvent},
    frame::AudioChunkFrame,
    protocol::{
        self, AudioChunkMessage, ClientMessage, InboundMessage, SessionTarget, TranscriptUpdate,
        normalize_error,
    },
    timers::Timer,
    transport::{CloseReason, Connector, Frame, TransportEvent, TransportLink},
};
use crate::{
    config::SessionSettings,
    error::{SessionError, TransportError},
    health::HealthProbe,
};
use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use parley_core::{EventBus, PendingMessage, PendingQueue, Reassembler};
use std::{fmt, future::pending, sync::Arc};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::{Instant, Interval, MissedTickBehavior, interval_at},
};
use tracing::{Instrument, debug, error, info, trace, warn};
use url::Url;

/// Lifecycle of a session connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    /// The socket is open but the session is not usable yet.
    TransportOpen,
    Ready,
    Closing,
    /// Closed deliberately, or waiting out a reconnect delay.
    Closed,
    /// Terminal until the next `connect()`.
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::TransportOpen => "transport_open",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot published on every transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Consecutive unexpected closures since the last time the session was ready.
    pub retries: u32,
}

type ConnectReply = oneshot::Sender<Result<(), SessionError>>;

/// Requests sent from the handle to the driver.
pub(crate) enum Command {
    Connect {
        target: SessionTarget,
        url: Url,
        reply: ConnectReply,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Send {
        frame: Frame,
        reply: oneshot::Sender<bool>,
    },
    PendingLen {
        reply: oneshot::Sender<usize>,
    },
}

enum Input {
    Command(Command),
    HandleDropped,
    Opened(Result<TransportLink, TransportError>),
    Transport(TransportEvent),
    ConnectTimeout,
    ReconnectDue,
    Settled,
    HandshakeTimeout,
    HealthTick,
}

pub(crate) struct SessionDriver {
    settings: SessionSettings,
    connector: Arc<dyn Connector>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    events: Arc<EventBus<SessionEvent>>,
    status_tx: watch::Sender<ConnectionStatus>,
    commands: mpsc::UnboundedReceiver<Command>,

    state: ConnectionState,
    target: Option<SessionTarget>,
    url: Option<Url>,
    retries: u32,
    waiters: Vec<ConnectReply>,
    opening: Option<BoxFuture<'static, Result<TransportLink, TransportError>>>,
    link: Option<TransportLink>,
    pending: PendingQueue<Frame>,
    reassembler: Reassembler,

    connect_timeout: Timer,
    reconnect_delay: Timer,
    settle: Timer,
    handshake_timeout: Timer,
    health_interval: Option<Interval>,
    health_task: Option<JoinHandle<()>>,
}

impl SessionDriver {
    pub(crate) fn new(
        settings: SessionSettings,
        connector: Arc<dyn Connector>,
        health_probe: Option<Arc<dyn HealthProbe>>,
        events: Arc<EventBus<SessionEvent>>,
        status_tx: watch::Sender<ConnectionStatus>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            settings,
            connector,
            health_probe,
            events,
            status_tx,
            commands,
            state: ConnectionState::Idle,
            target: None,
            url: None,
            retries: 0,
            waiters: Vec::new(),
            opening: None,
            link: None,
            pending: PendingQueue::new(),
            reassembler: Reassembler::new(),
            connect_timeout: Timer::new("connect_timeout"),
            reconnect_delay: Timer::new("reconnect_delay"),
            settle: Timer::new("readiness_settle"),
            handshake_timeout: Timer::new("handshake_timeout"),
            health_interval: None,
            health_task: None,
        }
    }

    /// Main loop. Returns once the owning handle is gone.
    pub(crate) async fn run(mut self) {
        debug!("Session driver started");
        loop {
            match self.next_input().await {
                Input::Command(command) => self.handle_command(command).await,
                Input::HandleDropped => break,
                Input::Opened(result) => {
                    self.opening = None;
                    self.on_open(result).await;
                }
                Input::Transport(event) => self.on_transport_event(event).await,
                Input::ConnectTimeout => self.on_connect_timeout(),
                Input::ReconnectDue => self.begin_attempt(),
                Input::Settled => self.on_settled().await,
                Input::HandshakeTimeout => self.on_handshake_timeout().await,
                Input::HealthTick => self.probe_health(),
            }
        }

        self.stop_voice_session().await;
        self.abort_current(SessionError::DriverStopped).await;
        debug!("Session driver stopped");
    }

    async fn next_input(&mut self) -> Input {
        tokio::select! {
            command = self.commands.recv() => match command {
                Some(command) => Input::Command(command),
                None => Input::HandleDropped,
            },
            result = open_result(&mut self.opening) => Input::Opened(result),
            event = transport_event(&mut self.link) => Input::Transport(event),
            _ = self.connect_timeout.fired() => Input::ConnectTimeout,
            _ = self.reconnect_delay.fired() => Input::ReconnectDue,
            _ = self.settle.fired() => Input::Settled,
            _ = self.handshake_timeout.fired() => Input::HandshakeTimeout,
            _ = health_tick(&mut self.health_interval) => Input::HealthTick,
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { target, url, reply } => self.on_connect(target, url, reply).await,
            Command::Disconnect { reply } => {
                self.on_disconnect().await;
                let _ = reply.send(());
            }
            Command::Send { frame, reply } => {
                let sent = self.on_send(frame).await;
                let _ = reply.send(sent);
            }
            Command::PendingLen { reply } => {
                let _ = reply.send(self.pending.len());
            }
        }
    }

    // --- connect / disconnect -------------------------------------------

    async fn on_connect(&mut self, target: SessionTarget, url: Url, reply: ConnectReply) {
        if self.target.as_ref() == Some(&target) {
            match self.state {
                ConnectionState::Connecting => {
                    debug!("Joining in-flight connection attempt");
                    self.waiters.push(reply);
                    return;
                }
                ConnectionState::TransportOpen | ConnectionState::Ready => {
                    let _ = reply.send(Ok(()));
                    return;
                }
                _ => {}
            }
        } else if self.target.is_some() {
            info!("Superseding previous session target");
        }

        self.abort_current(SessionError::Superseded).await;
        self.target = Some(target);
        self.url = Some(url);
        self.retries = 0;
        self.waiters.push(reply);
        self.begin_attempt();
    }

    async fn on_disconnect(&mut self) {
        self.stop_voice_session().await;
        self.abort_current(SessionError::Disconnected).await;
        self.target = None;
        self.url = None;
        self.retries = 0;
        if self.state == ConnectionState::Idle {
            self.publish_status();
        } else {
            self.set_state(ConnectionState::Closed);
        }
        info!("Session disconnected");
    }

    /// A ready voice session is told to stop before its transport closes.
    async fn stop_voice_session(&mut self) {
        let voice_ready = self.state == ConnectionState::Ready
            && self
                .target
                .as_ref()
                .is_some_and(SessionTarget::requires_handshake);
        if voice_ready {
            self.send_control(&ClientMessage::StopSession).await;
        }
    }

    /// Tear down whatever the current attempt owns. An open transport is
    /// closed with a normal code so the far end does not expect a retry.
    async fn abort_current(&mut self, reason: SessionError) {
        self.cancel_timers();
        self.stop_health();
        if self.opening.take().is_some() {
            debug!("Cancelled in-flight transport open");
        }
        self.reject_waiters(&reason);

        if let Some(mut link) = self.link.take() {
            self.set_state(ConnectionState::Closing);
            let close = CloseReason::normal(reason.to_string());
            if let Err(e) = link.sink.close(close.clone()).await {
                warn!(error = %e, "Failed to close transport cleanly");
            }
            self.emit(
                events::DISCONNECTED,
                SessionEvent::Disconnected {
                    code: close.code,
                    reason: close.reason,
                },
            );
        }
        self.reassembler.clear();
    }

    fn begin_attempt(&mut self) {
        let Some(url) = self.url.clone() else {
            warn!("No session target to connect to");
            return;
        };
        info!(path = url.path(), attempt = self.retries, "Opening transport");
        self.set_state(ConnectionState::Connecting);

        let connector = self.connector.clone();
        self.opening = Some(Box::pin(async move { connector.connect(url).await }));
        self.connect_timeout.arm(self.settings.connect_timeout);
    }

    async fn on_open(&mut self, result: Result<TransportLink, TransportError>) {
        self.connect_timeout.cancel();
        match result {
            Ok(link) => {
                info!("Transport open");
                self.link = Some(link);
                self.set_state(ConnectionState::TransportOpen);
                for waiter in self.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }

                let needs_handshake = self
                    .target
                    .as_ref()
                    .is_some_and(SessionTarget::requires_handshake);
                if needs_handshake {
                    self.settle.arm(self.settings.settle_delay);
                } else {
                    self.enter_ready().await;
                }
            }
            Err(e) => self.on_open_failed(SessionError::Transport(e.to_string())),
        }
    }

    fn on_connect_timeout(&mut self) {
        self.opening = None;
        self.on_open_failed(SessionError::ConnectTimeout(self.settings.connect_timeout));
    }

    fn on_open_failed(&mut self, err: SessionError) {
        warn!(error = %err, attempt = self.retries, "Transport failed to open");
        self.emit_error(err.to_string(), ErrorSource::Transport);
        self.reject_waiters(&err);

        if self.retries == 0 {
            self.set_state(ConnectionState::Failed);
        } else {
            self.schedule_reconnect();
        }
    }

    fn reject_waiters(&mut self, err: &SessionError) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(err.clone()));
        }
    }

    // --- readiness --------------------------------------------------------

    async fn on_settled(&mut self) {
        let Some(SessionTarget::Voice(config)) = self.target.clone() else {
            return;
        };
        debug!("Requesting voice session start");
        self.send_control(&ClientMessage::StartSession { config }).await;
        self.handshake_timeout.arm(self.settings.handshake_timeout);
    }

    fn on_session_ready(&mut self) -> bool {
        if self.state != ConnectionState::TransportOpen {
            debug!(state = %self.state, "Ignoring session_ready outside of handshake");
            return false;
        }
        self.settle.cancel();
        self.handshake_timeout.cancel();
        true
    }

    async fn on_handshake_timeout(&mut self) {
        if self.state != ConnectionState::TransportOpen {
            return;
        }
        warn!(timeout = ?self.settings.handshake_timeout, "No session_ready from server");
        self.emit_error(
            "Timed out waiting for the voice session to become ready",
            ErrorSource::Handshake,
        );

        if let Some(mut link) = self.link.take() {
            self.set_state(ConnectionState::Closing);
            let close = CloseReason::normal("Handshake timeout");
            if let Err(e) = link.sink.close(close.clone()).await {
                warn!(error = %e, "Failed to close transport cleanly");
            }
            self.emit(
                events::DISCONNECTED,
                SessionEvent::Disconnected {
                    code: close.code,
                    reason: close.reason,
                },
            );
        }
        self.reassembler.clear();
        self.set_state(ConnectionState::Failed);
    }

    async fn enter_ready(&mut self) {
        self.retries = 0;
        self.set_state(ConnectionState::Ready);
        if let Some(target) = self.target.clone() {
            self.emit(events::CONNECTED, SessionEvent::Connected { target });
        }
        info!(queued = self.pending.len(), "Session ready");
        self.flush().await;
        self.start_health();
    }

    // --- closure and reconnect --------------------------------------------

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => self.on_text(text).await,
            TransportEvent::Binary(data) => self.on_binary(&data),
            TransportEvent::Error(message) => {
                warn!(error = %message, "Transport error");
                self.emit_error(message, ErrorSource::Transport);
            }
            TransportEvent::Closed(reason) => self.on_closed(reason),
        }
    }

    fn on_closed(&mut self, reason: CloseReason) {
        info!(code = reason.code, reason = %reason.reason, "Transport closed");
        self.link = None;
        self.reassembler.clear();
        self.settle.cancel();
        self.handshake_timeout.cancel();
        self.stop_health();
        self.emit(
            events::DISCONNECTED,
            SessionEvent::Disconnected {
                code: reason.code,
                reason: reason.reason.clone(),
            },
        );

        if reason.is_clean() {
            self.set_state(ConnectionState::Closed);
        } else {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let backoff = &self.settings.backoff;
        if !backoff.allows(self.retries + 1) {
            let attempts = self.retries;
            error!(attempts, "Giving up on reconnecting");
            self.emit(
                events::RECONNECT_FAILED,
                SessionEvent::ReconnectFailed { attempts },
            );
            self.set_state(ConnectionState::Failed);
            return;
        }

        self.retries += 1;
        let delay = backoff.delay(self.retries);
        info!(attempt = self.retries, ?delay, "Scheduling reconnect");
        self.set_state(ConnectionState::Closed);
        self.reconnect_delay.arm(delay);
    }

    // --- outbound ---------------------------------------------------------

    async fn on_send(&mut self, frame: Frame) -> bool {
        let message = self.pending.stamp(frame);
        if self.state != ConnectionState::Ready {
            trace!(sequence = message.sequence, state = %self.state, "Queued until ready");
            self.pending.push_back(message);
            return false;
        }
        if !self.pending.is_empty() {
            self.pending.push_back(message);
            return self.flush().await;
        }
        self.transmit(message).await
    }

    /// Drain the pending queue in order. Stops at the first failure.
    async fn flush(&mut self) -> bool {
        while self.state == ConnectionState::Ready {
            let Some(message) = self.pending.pop_front() else {
                return true;
            };
            if !self.transmit(message).await {
                return false;
            }
        }
        self.pending.is_empty()
    }

    async fn transmit(&mut self, message: PendingMessage<Frame>) -> bool {
        let result = match self.link.as_mut() {
            Some(link) => link.sink.send(message.payload.clone()).await,
            None => Err(TransportError::NotConnected),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(sequence = message.sequence, error = %e, "Send failed; requeued");
                self.pending.requeue_front(message);
                self.emit(
                    events::SEND_ERROR,
                    SessionEvent::SendError {
                        message: e.to_string(),
                    },
                );
                false
            }
        }
    }

    /// Control frames bypass the pending queue.
    async fn send_control(&mut self, message: &ClientMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = ?e, "Failed to encode control message");
                return;
            }
        };
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if let Err(e) = link.sink.send(Frame::Text(text)).await {
            warn!(error = %e, "Failed to send control message");
            self.emit_error(e.to_string(), ErrorSource::Transport);
        }
    }

    // --- inbound ----------------------------------------------------------

    async fn on_text(&mut self, text: String) {
        let message = match InboundMessage::parse(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Discarding malformed message");
                self.emit(
                    events::PARSE_ERROR,
                    SessionEvent::ParseError {
                        message: e.to_string(),
                        raw: text,
                    },
                );
                return;
            }
        };

        match message.kind.as_deref() {
            Some(protocol::SESSION_READY) => {
                if self.on_session_ready() {
                    self.enter_ready().await;
                }
                self.emit(protocol::SESSION_READY, SessionEvent::Message(message.clone()));
            }
            Some(protocol::ERROR) => {
                let reason = normalize_error(&message.body);
                warn!(error = %reason, "Server reported an error");
                self.emit_error(reason, ErrorSource::Server);
            }
            Some(protocol::TRANSCRIPT) => match message.decode::<TranscriptUpdate>() {
                Ok(update) => self.emit(events::TRANSCRIPT, SessionEvent::Transcript(update)),
                Err(e) => self.emit(
                    events::PARSE_ERROR,
                    SessionEvent::ParseError {
                        message: e.to_string(),
                        raw: text,
                    },
                ),
            },
            Some(protocol::AUDIO_CHUNK) => {
                self.on_audio_chunk_message(&message);
                self.emit(protocol::AUDIO_CHUNK, SessionEvent::Message(message.clone()));
            }
            Some(kind) => self.emit(kind, SessionEvent::Message(message.clone())),
            None => {}
        }

        self.emit(events::MESSAGE, SessionEvent::Message(message));
    }

    fn on_audio_chunk_message(&mut self, message: &InboundMessage) {
        let chunk = match message.decode::<AudioChunkMessage>() {
            Ok(chunk) => chunk,
            Err(e) => {
                self.emit_error(format!("Invalid audio chunk: {e}"), ErrorSource::Protocol);
                return;
            }
        };
        match STANDARD.decode(chunk.data.as_bytes()) {
            Ok(data) => self.ingest_chunk(
                chunk.message_id,
                chunk.chunk_index,
                chunk.total_chunks,
                Bytes::from(data),
            ),
            Err(e) => {
                self.emit_error(format!("Invalid audio chunk data: {e}"), ErrorSource::Protocol)
            }
        }
    }

    fn on_binary(&mut self, data: &Bytes) {
        match AudioChunkFrame::decode(data) {
            Ok(frame) => self.ingest_chunk(
                frame.message_id,
                frame.chunk_index,
                frame.total_chunks,
                frame.payload,
            ),
            Err(e) => {
                warn!(error = %e, len = data.len(), "Discarding malformed binary frame");
                self.emit_error(e.to_string(), ErrorSource::Protocol);
            }
        }
    }

    fn ingest_chunk(&mut self, message_id: String, index: u32, total: u32, data: Bytes) {
        match self.reassembler.ingest(&message_id, index, total, data) {
            Ok(Some(data)) => {
                debug!(%message_id, total, len = data.len(), "Audio message complete");
                self.emit(
                    events::AUDIO_RECEIVED,
                    SessionEvent::AudioReceived { message_id, data },
                );
            }
            Ok(None) => trace!(%message_id, index, total, "Buffered audio chunk"),
            Err(e) => {
                warn!(%message_id, error = %e, "Rejected audio chunk");
                self.emit_error(e.to_string(), ErrorSource::Protocol);
            }
        }
    }

    // --- health -----------------------------------------------------------

    fn start_health(&mut self) {
        let period = self.settings.health_interval;
        if self.health_probe.is_none() {
            return;
        }
        if period.is_zero() {
            debug!("Health interval is zero, probing disabled");
            return;
        }
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.health_interval = Some(interval);
    }

    fn stop_health(&mut self) {
        self.health_interval = None;
        if let Some(task) = self.health_task.take() {
            task.abort();
        }
    }

    /// Advisory only: the outcome is reported and never changes state.
    fn probe_health(&mut self) {
        let Some(probe) = self.health_probe.clone() else {
            return;
        };
        if self.health_task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("Previous health probe still running");
            return;
        }

        let events = self.events.clone();
        let task = async move {
            let event = match probe.check().await {
                Ok(()) => {
                    debug!("Health probe succeeded");
                    SessionEvent::Health {
                        healthy: true,
                        detail: None,
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Health probe failed");
                    SessionEvent::Health {
                        healthy: false,
                        detail: Some(e.to_string()),
                    }
                }
            };
            events.emit(events::HEALTH, &event);
        };
        self.health_task = Some(tokio::spawn(task.in_current_span()));
    }

    // --- bookkeeping ------------------------------------------------------

    fn cancel_timers(&mut self) {
        self.connect_timeout.cancel();
        self.reconnect_delay.cancel();
        self.settle.cancel();
        self.handshake_timeout.cancel();
    }

    fn set_state(&mut self, to: ConnectionState) {
        let from = self.state;
        self.state = to;
        self.publish_status();
        if from != to {
            debug!(%from, %to, "State transition");
            self.emit(events::STATE_CHANGED, SessionEvent::StateChanged { from, to });
        }
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(ConnectionStatus {
            state: self.state,
            retries: self.retries,
        });
    }

    fn emit(&self, name: &str, event: SessionEvent) {
        self.events.emit(name, &event);
    }

    fn emit_error(&self, message: impl Into<String>, source: ErrorSource) {
        self.emit(
            events::ERROR,
            SessionEvent::Error {
                message: message.into(),
                source: Some(source),
            },
        );
    }
}

async fn open_result(
    opening: &mut Option<BoxFuture<'static, Result<TransportLink, TransportError>>>,
) -> Result<TransportLink, TransportError> {
    match opening {
        Some(open) => open.await,
        None => pending().await,
    }
}

async fn transport_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.stream.next_event().await,
        None => pending().await,
    }
}

async fn health_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(ConnectionState::default(), ConnectionState::Idle);
        assert_eq!(ConnectionState::TransportOpen.to_string(), "transport_open");
        assert_eq!(ConnectionState::Failed.as_str(), "failed");
    }

    #[test]
    fn test_default_status() {
        let status = ConnectionStatus::default();
        assert_eq!(status.state, ConnectionState::Idle);
        assert_eq!(status.retries, 0);
    }
}
