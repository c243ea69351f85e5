//! Wire protocol message types.
//!
//! This module defines the JSON message format exchanged between the client
//! and the kettle controller.
//!
//! # Protocol Overview
//!
//! | Frame | Direction | Purpose |
//! |-------|-----------|---------|
//! | [`OutboundFrame`] | Client → Device | Operation request |
//! | [`InboundFrame::Challenge`] | Device → Client | Auth nonce |
//! | [`InboundFrame::Response`] | Device → Client | Request result |
//! | [`InboundFrame::Status`] | Device → Client | LED state push |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame and payload types |
//! | `status` | Status report and button codes |

// ============================================================================
// Submodules
// ============================================================================

/// Frame and payload types.
pub mod frame;

/// Status report and button codes.
pub mod status;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{InboundFrame, OutboundFrame, Payload, ops};
pub use status::{ButtonId, StatusReport};
