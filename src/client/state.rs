//! Connection state and its observable cell.
//!
//! Some transitions are deliberately transient for display purposes: the
//! client shows `Connected` or `Error` briefly and then settles back to
//! `Idle`. The revert is a scheduled, cancellable transition; any transition
//! that lands first cancels it, so a stale timer can never act on a
//! superseded state.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::trace;

// ============================================================================
// ConnectionState
// ============================================================================

/// Connection lifecycle state as observed by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection attempt has been made yet.
    Uninitialized,
    /// A connection attempt is in flight.
    Connecting,
    /// Handshake accepted just now; reverts to `Idle` shortly.
    Connected,
    /// A command is in flight (reserved for presentation use; the core
    /// never enters it).
    Waiting,
    /// Authenticated session, nothing in flight.
    Idle,
    /// A recoverable fault was just surfaced; reverts to `Idle` shortly.
    Error,
    /// No connection. Terminal until the next `init()`.
    Closed,
}

impl ConnectionState {
    /// Returns `true` for the authenticated-session family of states.
    #[inline]
    #[must_use]
    pub const fn is_session(self) -> bool {
        matches!(self, Self::Connected | Self::Idle | Self::Waiting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Waiting => "waiting",
            Self::Idle => "idle",
            Self::Error => "error",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ============================================================================
// StateCell
// ============================================================================

/// Observer callback for state transitions.
pub(crate) type StateSink = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// Shared, observable connection state with transient transitions.
#[derive(Clone)]
pub(crate) struct StateCell {
    inner: Arc<StateInner>,
}

struct StateInner {
    /// Current state.
    current: Mutex<ConnectionState>,
    /// Bumped on every transition; a scheduled revert only fires if the
    /// epoch it captured is still current.
    epoch: AtomicU64,
    /// Pending revert timer, if any.
    revert: Mutex<Option<AbortHandle>>,
    /// Registered observer. Registration replaces any previous observer.
    sink: Mutex<Option<StateSink>>,
}

impl StateCell {
    /// Creates a cell in the `Uninitialized` state.
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(StateInner {
                current: Mutex::new(ConnectionState::Uninitialized),
                epoch: AtomicU64::new(0),
                revert: Mutex::new(None),
                sink: Mutex::new(None),
            }),
        }
    }

    /// Returns the current state.
    pub(crate) fn get(&self) -> ConnectionState {
        *self.inner.current.lock()
    }

    /// Registers the state observer, replacing any previous one.
    pub(crate) fn set_sink(&self, sink: StateSink) {
        *self.inner.sink.lock() = Some(sink);
    }

    /// Transitions to `state`, cancelling any scheduled revert.
    pub(crate) fn set(&self, state: ConnectionState) {
        self.inner.cancel_revert();
        self.inner.apply(state);
    }

    /// Transitions to `state` and schedules a revert to `Idle` after
    /// `revert_after`, unless another transition preempts it.
    pub(crate) fn set_transient(&self, state: ConnectionState, revert_after: Duration) {
        self.inner.cancel_revert();
        let epoch = self.inner.apply(state);

        if state == ConnectionState::Idle {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(revert_after).await;
            inner.revert.lock().take();
            inner.apply_if_epoch(epoch, ConnectionState::Idle);
        });
        *self.inner.revert.lock() = Some(task.abort_handle());
    }
}

impl StateInner {
    /// Applies a transition and notifies the observer. Returns the new epoch.
    ///
    /// Re-applying the current state is a no-op for the observer, so
    /// converging paths (e.g. several ways of settling on `Closed`) surface
    /// as a single transition.
    fn apply(&self, state: ConnectionState) -> u64 {
        let epoch;
        {
            let mut current = self.current.lock();
            if *current == state {
                return self.epoch.load(Ordering::SeqCst);
            }
            *current = state;
            epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        }
        trace!(state = %state, "State transition");

        if let Some(sink) = &*self.sink.lock() {
            sink(state);
        }
        epoch
    }

    /// Applies a transition only if no other transition happened since
    /// `expected_epoch`.
    fn apply_if_epoch(&self, expected_epoch: u64, state: ConnectionState) {
        {
            let mut current = self.current.lock();
            if self.epoch.load(Ordering::SeqCst) != expected_epoch {
                return;
            }
            *current = state;
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
        trace!(state = %state, "Scheduled revert");

        if let Some(sink) = &*self.sink.lock() {
            sink(state);
        }
    }

    /// Cancels a scheduled revert, if any.
    fn cancel_revert(&self) {
        if let Some(handle) = self.revert.lock().take() {
            handle.abort();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_session_family() {
        assert!(ConnectionState::Connected.is_session());
        assert!(ConnectionState::Idle.is_session());
        assert!(ConnectionState::Waiting.is_session());
        assert!(!ConnectionState::Connecting.is_session());
        assert!(!ConnectionState::Closed.is_session());
        assert!(!ConnectionState::Error.is_session());
    }

    #[test]
    fn test_display_matches_wire_names() {
        assert_eq!(ConnectionState::Uninitialized.to_string(), "uninitialized");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionState::Idle.to_string(), "idle");
    }

    #[test]
    fn test_set_updates_and_notifies() {
        let cell = StateCell::new();
        assert_eq!(cell.get(), ConnectionState::Uninitialized);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        cell.set_sink(Box::new(move |state| sink_seen.lock().push(state)));

        cell.set(ConnectionState::Connecting);
        cell.set(ConnectionState::Closed);

        assert_eq!(cell.get(), ConnectionState::Closed);
        assert_eq!(
            *seen.lock(),
            vec![ConnectionState::Connecting, ConnectionState::Closed]
        );
    }

    #[test]
    fn test_repeated_set_notifies_once() {
        let cell = StateCell::new();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        cell.set_sink(Box::new(move |state| sink_seen.lock().push(state)));

        cell.set(ConnectionState::Closed);
        cell.set(ConnectionState::Closed);
        cell.set(ConnectionState::Closed);

        assert_eq!(cell.get(), ConnectionState::Closed);
        assert_eq!(*seen.lock(), vec![ConnectionState::Closed]);
    }

    #[test]
    fn test_sink_registration_replaces() {
        let cell = StateCell::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&first);
        cell.set_sink(Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));
        let count = Arc::clone(&second);
        cell.set_sink(Box::new(move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        }));

        cell.set(ConnectionState::Connecting);

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_reverts_to_idle() {
        let cell = StateCell::new();
        cell.set_transient(ConnectionState::Connected, Duration::from_secs(2));
        assert_eq!(cell.get(), ConnectionState::Connected);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(cell.get(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_preempting_transition_cancels_revert() {
        let cell = StateCell::new();
        cell.set_transient(ConnectionState::Error, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(1)).await;
        cell.set(ConnectionState::Closed);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cell.get(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_to_idle_schedules_nothing() {
        let cell = StateCell::new();
        cell.set_transient(ConnectionState::Idle, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cell.get(), ConnectionState::Idle);
    }
}
