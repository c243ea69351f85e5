//! Error types for the kettle client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use kettle_link::{KettleClient, Result};
//!
//! async fn example(client: &KettleClient) -> Result<()> {
//!     client.press_button(kettle_link::ButtonId::Power).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | Protocol | [`Error::Protocol`] |
//! | Authentication | [`Error::Authentication`] |
//! | Request | [`Error::Timeout`], [`Error::Application`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when the client configuration is invalid, e.g. a malformed
    /// endpoint URL.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// WebSocket connection failed.
    ///
    /// Returned when the connection to the device cannot be established
    /// or fails mid-flight.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection closed.
    ///
    /// Returned to every request that was still pending when the transport
    /// closed, and by operations attempted while disconnected.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or unexpected frame.
    ///
    /// Returned when an inbound frame cannot be interpreted.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Authentication Errors
    // ========================================================================
    /// The device rejected the hashed credential.
    ///
    /// Terminal for the session: the client will not reconnect until
    /// re-initialized.
    #[error("Authentication rejected by device")]
    Authentication,

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No response arrived within the request's deadline.
    ///
    /// Rejects only the affected request, except for the liveness probe
    /// where it is escalated to a connection-fatal condition.
    #[error("Timeout after {timeout_ms}ms while calling '{operation}'")]
    Timeout {
        /// Operation name that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// The device answered a specific request with an error payload.
    ///
    /// The connection remains usable.
    #[error("Device error: {message}")]
    Application {
        /// Error message supplied by the device.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates an application error from a device-supplied message.
    #[inline]
    pub fn application(message: impl Into<String>) -> Self {
        Self::Application {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the device rejected this specific request.
    #[inline]
    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self, Self::Application { .. })
    }

    /// Returns `true` if this error is recoverable by reconnecting.
    ///
    /// Authentication rejection is not recoverable: retrying with the same
    /// secret would fail again.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Authentication | Self::Config { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection("refused");
        assert_eq!(err.to_string(), "Connection failed: refused");
    }

    #[test]
    fn test_protocol_display() {
        let err = Error::protocol("unknown frame type");
        assert_eq!(err.to_string(), "Protocol error: unknown frame type");
    }

    #[test]
    fn test_timeout_display_names_operation() {
        let err = Error::timeout("ping", 10_000);
        assert_eq!(
            err.to_string(),
            "Timeout after 10000ms while calling 'ping'"
        );
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::timeout("ping", 1000).is_timeout());
        assert!(!Error::connection("test").is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::connection("test").is_connection_error());
        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
        assert!(!Error::Authentication.is_connection_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::timeout("ping", 1000).is_recoverable());
        assert!(Error::ConnectionClosed.is_recoverable());
        assert!(!Error::Authentication.is_recoverable());
        assert!(!Error::config("bad url").is_recoverable());
    }

    #[test]
    fn test_is_application() {
        assert!(Error::application("busy").is_application());
        assert!(!Error::ConnectionClosed.is_application());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "gone");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
