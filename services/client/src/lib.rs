//! Parley client library.
//!
//! A unified real-time session client for a chat and voice backend: one
//! [`ws::SessionConnection`] per logical session, with reconnects, ordered
//! delivery, chunked audio reassembly and sequential playback. The `parley`
//! binary is a thin wrapper around this library.

pub mod audio;
pub mod audio_utils;
pub mod config;
pub mod credentials;
pub mod error;
pub mod health;
pub mod ws;
