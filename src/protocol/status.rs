//! Device status payload and button codes.
//!
//! The reference kettle pushes its full LED indicator state whenever it
//! changes and accepts four front-panel button codes.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Payload;

// ============================================================================
// StatusReport
// ============================================================================

/// LED indicator state as pushed by the device.
///
/// Flags are `0` or `1` on the wire. The all-zero default is used as the
/// neutral value the status sink is reset to when the connection closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Power LED.
    #[serde(default)]
    pub led_power: u8,

    /// 70 °C target LED.
    #[serde(default)]
    pub led_70: u8,

    /// 80 °C target LED.
    #[serde(default)]
    pub led_80: u8,

    /// 90 °C target LED.
    #[serde(default)]
    pub led_90: u8,

    /// 100 °C target LED.
    #[serde(default)]
    pub led_100: u8,

    /// Keep-warm LED.
    #[serde(default)]
    pub led_keepwarm: u8,
}

impl StatusReport {
    /// Parses a status payload, tolerating missing flags.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the payload is not an object of
    /// numeric flags.
    pub fn from_value(value: &Value) -> crate::Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Returns the neutral all-off payload as a JSON value.
    #[must_use]
    pub fn neutral() -> Value {
        serde_json::to_value(Self::default()).unwrap_or(Value::Null)
    }
}

// ============================================================================
// ButtonId
// ============================================================================

/// Front-panel button codes accepted by the `button_press` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ButtonId {
    /// Power on/off.
    Power = 0,
    /// Lower the target temperature.
    TempDown = 1,
    /// Raise the target temperature.
    TempUp = 2,
    /// Toggle keep-warm mode.
    KeepWarm = 3,
}

impl ButtonId {
    /// Returns the wire code for this button.
    #[inline]
    #[must_use]
    pub const fn code(self) -> i64 {
        self as i64
    }
}

impl From<ButtonId> for Payload {
    fn from(button: ButtonId) -> Self {
        Payload::Number(button.code())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_button_codes() {
        assert_eq!(ButtonId::Power.code(), 0);
        assert_eq!(ButtonId::TempDown.code(), 1);
        assert_eq!(ButtonId::TempUp.code(), 2);
        assert_eq!(ButtonId::KeepWarm.code(), 3);
    }

    #[test]
    fn test_button_payload() {
        assert_eq!(Payload::from(ButtonId::TempUp), Payload::Number(2));
    }

    #[test]
    fn test_parse_full_report() {
        let value = json!({
            "led_power": 1,
            "led_70": 0,
            "led_80": 0,
            "led_90": 1,
            "led_100": 0,
            "led_keepwarm": 0
        });
        let report = StatusReport::from_value(&value).expect("parse");
        assert_eq!(report.led_power, 1);
        assert_eq!(report.led_90, 1);
        assert_eq!(report.led_keepwarm, 0);
    }

    #[test]
    fn test_missing_flags_default_to_off() {
        let report = StatusReport::from_value(&json!({"led_power": 1})).expect("parse");
        assert_eq!(report.led_power, 1);
        assert_eq!(report.led_100, 0);
    }

    #[test]
    fn test_neutral_is_all_off() {
        let neutral = StatusReport::neutral();
        let report = StatusReport::from_value(&neutral).expect("parse");
        assert_eq!(report, StatusReport::default());
    }
}
