//! Wire frame types.
//!
//! Defines the JSON message format exchanged with the kettle controller.
//! Keys are single letters to keep frames small on the embedded side.
//!
//! # Format
//!
//! Outbound (client → device):
//!
//! ```json
//! {"o": "button_press", "d": 2, "i": 7}
//! ```
//!
//! Inbound (device → client), discriminated by `t`:
//!
//! ```json
//! {"t": "challenge", "d": "nonce"}
//! {"t": "response", "i": 7, "d": "ok"}
//! {"t": "response", "i": 7, "e": "unauthorized"}
//! {"t": "status", "d": {"led_power": 1, ...}}
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// Operations
// ============================================================================

/// Operation names understood by the device.
pub mod ops {
    /// Challenge/response authentication reply.
    pub const CHALLENGE: &str = "challenge";

    /// Liveness no-op probe.
    pub const PING: &str = "ping";

    /// Front-panel button press; payload is a [`ButtonId`] code.
    ///
    /// [`ButtonId`]: crate::protocol::ButtonId
    pub const BUTTON_PRESS: &str = "button_press";
}

// ============================================================================
// Payload
// ============================================================================

/// Outbound payload value: a string, a small integer, or null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// String payload (e.g. a challenge digest).
    Text(String),
    /// Integer payload (e.g. a button code).
    Number(i64),
    /// No payload.
    Null,
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for Payload {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::Null
    }
}

// ============================================================================
// OutboundFrame
// ============================================================================

/// A request frame from client to device.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundFrame {
    /// Operation name.
    #[serde(rename = "o")]
    pub operation: String,

    /// Operation payload.
    #[serde(rename = "d")]
    pub payload: Payload,

    /// Request id for response correlation. Strictly increasing within one
    /// connection generation.
    #[serde(rename = "i")]
    pub id: u64,
}

impl OutboundFrame {
    /// Creates a new outbound frame.
    #[inline]
    #[must_use]
    pub fn new(operation: impl Into<String>, payload: Payload, id: u64) -> Self {
        Self {
            operation: operation.into(),
            payload,
            id,
        }
    }
}

// ============================================================================
// InboundFrame
// ============================================================================

/// A frame from device to client, discriminated by the `t` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum InboundFrame {
    /// Authentication challenge carrying a one-time nonce.
    Challenge {
        /// Server-issued nonce.
        #[serde(rename = "d")]
        nonce: String,
    },

    /// Response to a previously sent request.
    Response {
        /// Matches the request's `i`.
        #[serde(rename = "i")]
        id: u64,

        /// Success payload, present on success.
        #[serde(rename = "d", default)]
        data: Option<Value>,

        /// Error message, present on failure.
        #[serde(rename = "e", default)]
        error: Option<String>,
    },

    /// Unsolicited status push (LED indicator state).
    Status {
        /// Status payload, forwarded verbatim to the status sink.
        #[serde(rename = "d")]
        data: Value,
    },
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_uses_short_keys() {
        let frame = OutboundFrame::new(ops::BUTTON_PRESS, Payload::Number(2), 7);
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(value, json!({"o": "button_press", "d": 2, "i": 7}));
    }

    #[test]
    fn test_outbound_null_payload() {
        let frame = OutboundFrame::new(ops::PING, Payload::Null, 1);
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(value, json!({"o": "ping", "d": null, "i": 1}));
    }

    #[test]
    fn test_parse_challenge() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"t":"challenge","d":"abc123"}"#).expect("parse");
        assert!(matches!(frame, InboundFrame::Challenge { nonce } if nonce == "abc123"));
    }

    #[test]
    fn test_parse_success_response() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"t":"response","i":3,"d":"ok"}"#).expect("parse");
        match frame {
            InboundFrame::Response { id, data, error } => {
                assert_eq!(id, 3);
                assert_eq!(data, Some(json!("ok")));
                assert_eq!(error, None);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_response() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"t":"response","i":1,"e":"unauthorized"}"#).expect("parse");
        match frame {
            InboundFrame::Response { id, data, error } => {
                assert_eq!(id, 1);
                assert_eq!(data, None);
                assert_eq!(error.as_deref(), Some("unauthorized"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_parse_status() {
        let frame: InboundFrame =
            serde_json::from_str(r#"{"t":"status","d":{"led_power":1}}"#).expect("parse");
        assert!(matches!(frame, InboundFrame::Status { data } if data["led_power"] == 1));
    }

    #[test]
    fn test_unknown_frame_type_is_rejected() {
        let parsed = serde_json::from_str::<InboundFrame>(r#"{"t":"mystery","d":1}"#);
        assert!(parsed.is_err());
    }
}
