//! Request/response correlation.
//!
//! Tracks outstanding requests by monotonic id and settles each exactly once.
//! One tracker exists per connection generation and is owned exclusively by
//! that generation's event loop task, so the map needs no locking.

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Channel used to deliver a request's outcome to its caller.
///
/// The oneshot sender consumes itself on send, which is what guarantees
/// every request settles at most once.
pub(crate) type ResponseSender = oneshot::Sender<Result<Value>>;

// ============================================================================
// PendingEntry
// ============================================================================

/// A registered request awaiting its response.
struct PendingEntry {
    /// Settles the caller's future.
    sender: ResponseSender,
    /// Expiry timer, cancelled when the entry settles first.
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    /// Cancels the expiry timer and settles the caller with `outcome`.
    fn settle(self, outcome: Result<Value>) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.sender.send(outcome);
    }
}

// ============================================================================
// RequestTracker
// ============================================================================

/// Correlates outgoing operations to inbound responses by request id.
///
/// Ids are strictly increasing within one connection generation, starting
/// at 1, and reset to 0 when the generation ends.
#[derive(Default)]
pub(crate) struct RequestTracker {
    /// Last id handed out; next request gets `last_id + 1`.
    last_id: u64,
    /// Requests awaiting a response, keyed by id.
    pending: FxHashMap<u64, PendingEntry>,
}

impl RequestTracker {
    /// Creates an empty tracker.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending request and returns its assigned id.
    pub(crate) fn register(&mut self, sender: ResponseSender) -> u64 {
        self.last_id += 1;
        self.pending.insert(
            self.last_id,
            PendingEntry {
                sender,
                timer: None,
            },
        );
        self.last_id
    }

    /// Attaches an expiry timer to a pending request.
    ///
    /// If the request already settled, the timer is cancelled instead.
    pub(crate) fn attach_timer(&mut self, id: u64, timer: AbortHandle) {
        match self.pending.get_mut(&id) {
            Some(entry) => entry.timer = Some(timer),
            None => timer.abort(),
        }
    }

    /// Settles the request matching an inbound response frame.
    ///
    /// Resolves with `data` when present, otherwise rejects with the
    /// device-supplied error. A response for an unknown id (already settled,
    /// timed out, or never sent) is logged and ignored.
    pub(crate) fn settle(&mut self, id: u64, data: Option<Value>, error: Option<String>) {
        let Some(entry) = self.pending.remove(&id) else {
            warn!(id, "Response with no matching request");
            return;
        };

        let outcome = match data {
            Some(value) => Ok(value),
            None => Err(Error::application(
                error.unwrap_or_else(|| "unspecified device error".to_string()),
            )),
        };
        entry.settle(outcome);
    }

    /// Rejects a pending request with a specific error, e.g. on expiry or a
    /// failed write.
    ///
    /// Returns `true` if an entry was still registered.
    pub(crate) fn fail(&mut self, id: u64, error: Error) -> bool {
        match self.pending.remove(&id) {
            Some(entry) => {
                entry.settle(Err(error));
                true
            }
            None => false,
        }
    }

    /// Rejects every pending request with [`Error::ConnectionClosed`] and
    /// resets the id counter for the next generation.
    pub(crate) fn reject_all(&mut self) {
        let count = self.pending.len();

        for (_, entry) in self.pending.drain() {
            entry.settle(Err(Error::ConnectionClosed));
        }
        self.last_id = 0;

        if count > 0 {
            debug!(count, "Rejected pending requests on close");
        }
    }

    /// Returns the number of requests awaiting a response.
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn channel() -> (ResponseSender, oneshot::Receiver<Result<Value>>) {
        oneshot::channel()
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let mut tracker = RequestTracker::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();
        let (tx3, _rx3) = channel();

        assert_eq!(tracker.register(tx1), 1);
        assert_eq!(tracker.register(tx2), 2);
        assert_eq!(tracker.register(tx3), 3);
        assert_eq!(tracker.pending_count(), 3);
    }

    #[test]
    fn test_settle_resolves_with_data() {
        let mut tracker = RequestTracker::new();
        let (tx, mut rx) = channel();
        let id = tracker.register(tx);

        tracker.settle(id, Some(json!("ok")), None);

        assert_eq!(
            rx.try_recv().expect("settled").expect("success"),
            json!("ok")
        );
        assert_eq!(tracker.pending_count(), 0);
    }

    #[test]
    fn test_settle_rejects_without_data() {
        let mut tracker = RequestTracker::new();
        let (tx, mut rx) = channel();
        let id = tracker.register(tx);

        tracker.settle(id, None, Some("busy".to_string()));

        let err = rx.try_recv().expect("settled").expect_err("rejected");
        assert!(matches!(err, Error::Application { message } if message == "busy"));
    }

    #[test]
    fn test_settle_unknown_id_is_ignored() {
        let mut tracker = RequestTracker::new();
        let (tx, mut rx) = channel();
        let id = tracker.register(tx);

        tracker.settle(id + 100, Some(json!("ok")), None);

        // The registered request is untouched.
        assert_eq!(tracker.pending_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_fail_rejects_with_given_error() {
        let mut tracker = RequestTracker::new();
        let (tx, mut rx) = channel();
        let id = tracker.register(tx);

        assert!(tracker.fail(id, Error::timeout("ping", 10)));

        let err = rx.try_recv().expect("settled").expect_err("rejected");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_settle_after_fail_is_ignored() {
        let mut tracker = RequestTracker::new();
        let (tx, _rx) = channel();
        let id = tracker.register(tx);

        assert!(tracker.fail(id, Error::timeout("ping", 10)));

        // A late response must not re-settle anything.
        tracker.settle(id, Some(json!("late")), None);
        assert!(!tracker.fail(id, Error::ConnectionClosed));
    }

    #[test]
    fn test_reject_all_settles_everything_and_resets_counter() {
        let mut tracker = RequestTracker::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();
        tracker.register(tx1);
        tracker.register(tx2);

        tracker.reject_all();

        assert_eq!(tracker.pending_count(), 0);
        for rx in [&mut rx1, &mut rx2] {
            let err = rx.try_recv().expect("settled").expect_err("rejected");
            assert!(matches!(err, Error::ConnectionClosed));
        }

        // Next generation starts over from 1.
        let (tx, _rx) = channel();
        assert_eq!(tracker.register(tx), 1);
    }

    #[tokio::test]
    async fn test_settle_cancels_attached_timer() {
        let mut tracker = RequestTracker::new();
        let (tx, mut rx) = channel();
        let id = tracker.register(tx);

        let timer = tokio::spawn(std::future::pending::<()>());
        tracker.attach_timer(id, timer.abort_handle());

        tracker.settle(id, Some(json!("ok")), None);

        assert!(rx.try_recv().expect("settled").is_ok());
        assert!(timer.await.expect_err("aborted").is_cancelled());
    }

    #[tokio::test]
    async fn test_attach_timer_to_settled_entry_aborts_it() {
        let mut tracker = RequestTracker::new();
        let (tx, _rx) = channel();
        let id = tracker.register(tx);
        tracker.fail(id, Error::ConnectionClosed);

        let timer = tokio::spawn(std::future::pending::<()>());
        tracker.attach_timer(id, timer.abort_handle());

        assert!(timer.await.expect_err("aborted").is_cancelled());
    }

    proptest! {
        #[test]
        fn prop_ids_strictly_increasing(count in 1usize..64) {
            let mut tracker = RequestTracker::new();
            let mut receivers = Vec::new();
            let mut previous = 0;

            for _ in 0..count {
                let (tx, rx) = channel();
                let id = tracker.register(tx);
                prop_assert!(id > previous);
                previous = id;
                receivers.push(rx);
            }

            prop_assert_eq!(tracker.pending_count(), count);
        }
    }
}
