//! The caller-facing handle over a session driver task.

use super::{
    events::SessionEvent,
    protocol::{Endpoint, SessionTarget},
    session::{Command, ConnectionState, ConnectionStatus, SessionDriver},
    transport::{Connector, Frame, TungsteniteConnector},
};
use crate::{
    config::SessionSettings,
    credentials::{CredentialSource, StaticToken},
    error::SessionError,
    health::HealthProbe,
};
use parley_core::{EventBus, SubscriptionId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, info_span, warn};
use uuid::Uuid;

/// A single logical session with the backend, chat or voice.
///
/// Owns one driver task. Dropping the handle lets the driver close the
/// transport normally and exit. Events are delivered
/// synchronously from the driver task, so handlers should return quickly.
pub struct SessionConnection {
    endpoint: Endpoint,
    credentials: Arc<dyn CredentialSource>,
    commands: mpsc::UnboundedSender<Command>,
    events: Arc<EventBus<SessionEvent>>,
    status: watch::Receiver<ConnectionStatus>,
}

pub struct SessionConnectionBuilder {
    endpoint: Endpoint,
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    health_probe: Option<Arc<dyn HealthProbe>>,
    settings: SessionSettings,
}

impl SessionConnectionBuilder {
    pub fn credentials(mut self, credentials: impl CredentialSource) -> Self {
        self.credentials = Arc::new(credentials);
        self
    }

    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Enables periodic liveness probing while the session is ready.
    pub fn health_probe(mut self, probe: impl HealthProbe) -> Self {
        self.health_probe = Some(Arc::new(probe));
        self
    }

    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Spawns the driver task. Must be called inside a tokio runtime.
    pub fn build(self) -> SessionConnection {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::default());
        let events = Arc::new(EventBus::new());

        let driver = SessionDriver::new(
            self.settings,
            self.connector,
            self.health_probe,
            events.clone(),
            status_tx,
            commands_rx,
        );
        let span = info_span!("session", connection_id = %Uuid::new_v4(), host = %self.endpoint.host);
        tokio::spawn(driver.run().instrument(span));

        SessionConnection {
            endpoint: self.endpoint,
            credentials: self.credentials,
            commands: commands_tx,
            events,
            status: status_rx,
        }
    }
}

impl SessionConnection {
    pub fn builder(endpoint: Endpoint) -> SessionConnectionBuilder {
        SessionConnectionBuilder {
            endpoint,
            credentials: Arc::new(StaticToken::none()),
            connector: Arc::new(TungsteniteConnector),
            health_probe: None,
            settings: SessionSettings::default(),
        }
    }

    /// Connect to `target`, resolving once the transport is open.
    ///
    /// A voice session is not usable until the `connected` event (or
    /// [`ConnectionState::Ready`]); sends issued before then are queued.
    pub async fn connect(&self, target: SessionTarget) -> Result<(), SessionError> {
        let Some(token) = self.credentials.token() else {
            warn!("Refusing to connect without a credential");
            return Err(SessionError::MissingCredential);
        };
        let url = self
            .endpoint
            .socket_url(&target, &token)
            .map_err(|e| SessionError::InvalidUrl(e.to_string()))?;

        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Connect { target, url, reply })
            .map_err(|_| SessionError::DriverStopped)?;
        outcome.await.map_err(|_| SessionError::DriverStopped)?
    }

    /// Close the session deliberately. Queued sends are kept for the next
    /// connection. Safe to call in any state.
    pub async fn disconnect(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Disconnect { reply }).is_ok() {
            let _ = done.await;
        }
    }

    /// Transmit `payload` now if the session is ready, otherwise queue it.
    ///
    /// Returns `true` only when it (and everything queued before it) went out.
    pub async fn send(&self, payload: impl Into<Frame>) -> bool {
        let (reply, sent) = oneshot::channel();
        let command = Command::Send {
            frame: payload.into(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return false;
        }
        sent.await.unwrap_or(false)
    }

    pub async fn send_json<T: Serialize + ?Sized>(&self, message: &T) -> Result<bool, SessionError> {
        let text = serde_json::to_string(message).map_err(|e| SessionError::Encode(e.to_string()))?;
        Ok(self.send(text).await)
    }

    /// Number of payloads waiting for the session to become ready.
    pub async fn pending_len(&self) -> usize {
        let (reply, len) = oneshot::channel();
        if self.commands.send(Command::PendingLen { reply }).is_err() {
            return 0;
        }
        len.await.unwrap_or(0)
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    /// Subscribe to an event by name. See [`super::events`] for the names;
    /// any inbound message `type` is also a valid name.
    pub fn on<F>(&self, event: impl Into<String>, handler: F) -> SubscriptionId
    where
        F: Fn(&SessionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.events.on(event, handler)
    }

    pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
        self.events.off(event, id)
    }

    pub fn events(&self) -> Arc<EventBus<SessionEvent>> {
        self.events.clone()
    }
}
