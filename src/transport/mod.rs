//! WebSocket transport layer.
//!
//! This module handles communication with the kettle controller over one
//! duplex WebSocket connection at a time.
//!
//! # Connection Lifecycle
//!
//! 1. [`Connection::open`] dials the device and spawns the event loop
//! 2. The device sends a challenge; the loop answers it and marks the
//!    session authenticated
//! 3. Handles issue requests; the loop correlates responses by id
//! 4. The generation ends with a [`CloseReason`]; every still-pending
//!    request is rejected and the id counter resets
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | WebSocket connection and event loop |
//! | `tracker` | Request/response correlation |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket connection and event loop.
pub(crate) mod connection;

/// Request/response correlation.
pub(crate) mod tracker;

// ============================================================================
// Re-exports
// ============================================================================

pub(crate) use connection::{
    CloseReason, Connection, ConnectionEvents, ConnectionHandle, SessionParams,
};
