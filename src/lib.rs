//! Kettle Link - Persistent WebSocket client for a Wi-Fi smart kettle.
//!
//! This library maintains one authenticated, self-healing connection to a
//! kettle controller (an embedded device speaking a small JSON protocol) and
//! exposes the device to a presentation layer through typed callbacks.
//!
//! # Architecture
//!
//! - **[`KettleClient`]**: owns the connection state machine; constructed
//!   once per session, persists across reconnects
//! - One **connection generation** at a time: a WebSocket, an event loop
//!   task, and a request tracker, all recreated on every reconnect
//! - **Challenge/response handshake**: the device sends a nonce, the client
//!   answers with `hex(SHA-256(secret + nonce))`; the secret never goes over
//!   the wire
//! - **Liveness probing**: a periodic `ping` round trip detects silently
//!   dead connections
//! - **Linear backoff**: reconnect delay is `base * attempt`, with a ceiling
//!   of 5 attempts
//!
//! # Quick Start
//!
//! ```no_run
//! use kettle_link::{ButtonId, ClientConfig, KettleClient, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = KettleClient::new(ClientConfig::new("ws://kettle.local:8000/", "pw"))?;
//!
//!     client.on_state(|state| println!("state: {state}"));
//!     client.on_status(|leds| println!("leds: {leds}"));
//!     client.on_credential_rejected(|| eprintln!("wrong password"));
//!
//!     client.init();
//!     client.press_button(ButtonId::Power).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`auth`] | Challenge/response digest |
//! | [`client`] | [`KettleClient`], configuration, connection state |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`protocol`] | Wire frame types (internal format, public payloads) |
//! | `transport` | WebSocket transport layer (internal) |

// ============================================================================
// Modules
// ============================================================================

/// Challenge/response authentication.
pub mod auth;

/// Connection manager and session supervisor.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Wire protocol message types.
pub mod protocol;

/// WebSocket transport layer.
///
/// Internal module handling the connection event loop and request
/// correlation.
pub(crate) mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{ClientConfig, ConnectionState, KettleClient};

// Error types
pub use error::{Error, Result};

// Protocol types
pub use protocol::{ButtonId, Payload, StatusReport};
