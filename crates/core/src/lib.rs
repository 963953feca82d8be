//! Transport-agnostic building blocks for the realtime session client.
//!
//! - `backoff`: reconnect delay schedule.
//! - `event_bus`: named publish/subscribe with isolated handlers.
//! - `pending`: outbound payloads waiting for a ready connection.
//! - `reassembler`: joins indexed binary chunks into whole payloads.
//! - `playback`: plays decoded audio strictly one buffer at a time.

pub mod backoff;
pub mod event_bus;
pub mod pending;
pub mod playback;
pub mod reassembler;

pub use backoff::BackoffPolicy;
pub use event_bus::{EventBus, SubscriptionId};
pub use pending::{PendingMessage, PendingQueue};
pub use playback::{AudioSink, PlaybackQueue};
pub use reassembler::{ReassemblyError, Reassembler};
