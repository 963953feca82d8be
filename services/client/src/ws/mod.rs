//! Real-time session plumbing.
//!
//! - `protocol`: JSON control messages, session targets and URL building.
//! - `frame`: the binary audio chunk frame codec.
//! - `transport`: the streaming transport traits and the WebSocket implementation.
//! - `session`: the driver task that owns one connection's state machine.
//! - `connection`: the [`SessionConnection`] handle callers use.
//! - `events`: event names and payloads.

mod connection;
pub mod events;
pub mod frame;
pub mod protocol;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
mod timers;
pub mod transport;

pub use connection::{SessionConnection, SessionConnectionBuilder};
pub use events::{ErrorSource, SessionEvent};
pub use protocol::{ClientMessage, EnhancementLevel, Endpoint, SessionTarget, VoiceConfig};
pub use session::{ConnectionState, ConnectionStatus};
pub use transport::{CloseReason, Connector, Frame, TungsteniteConnector};
