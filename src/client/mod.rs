//! Kettle client: connection manager and session supervisor.
//!
//! [`KettleClient`] is constructed once per session and persists across
//! reconnect attempts. Each connection generation (the WebSocket, its id
//! counter, and its pending-request map) is recreated by the supervisor task
//! on every attempt.
//!
//! # Lifecycle
//!
//! ```text
//! init() ──► Connecting ──open──► challenge/response ──► Connected ─┐
//!    ▲            │                      │                  2 s     │
//!    │            │ connect failed       │ rejected                 ▼
//!    │            ▼                      ▼                        Idle
//!    │         Closed ◄────────────── Closed (terminal)            │
//!    │            │ backoff: base * attempt, ceiling 5             │
//!    └────────────┘◄───────────── transport close ─────────────────┘
//! ```
//!
//! Caller-initiated [`KettleClient::close`] sets an intentional-close flag so
//! a user-requested disconnect is never mistaken for a network failure and
//! never triggers auto-reconnect.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `retry` | Linear backoff policy |
//! | `state` | Connection state and transient reverts |

// ============================================================================
// Submodules
// ============================================================================

/// Linear backoff policy.
pub(crate) mod retry;

/// Connection state and its observable cell.
pub(crate) mod state;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::protocol::{ButtonId, Payload, StatusReport, ops};
use crate::transport::{
    CloseReason, Connection, ConnectionEvents, ConnectionHandle, SessionParams,
};

use retry::ReconnectPolicy;
pub use state::ConnectionState;
use state::StateCell;

// ============================================================================
// Constants
// ============================================================================

/// Default delay multiplied by the attempt count between reconnects.
const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default reconnect ceiling.
const DEFAULT_MAX_RETRIES: u32 = 5;

/// Default interval between liveness probes.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default deadline for a liveness probe.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for the challenge round trip.
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time the transient `Connected`/`Error` states stay visible.
const DEFAULT_DISPLAY_DELAY: Duration = Duration::from_secs(2);

/// Default deadline for device commands.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// ClientConfig
// ============================================================================

/// Client configuration.
///
/// [`ClientConfig::new`] fills every knob with the reference defaults;
/// fields are public for callers that need different timings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Device endpoint, e.g. `ws://kettle.local:8000/`.
    pub endpoint: String,
    /// Shared secret; held in memory only, transmitted only hashed.
    pub secret: String,
    /// Delay multiplied by the attempt count between reconnects.
    pub base_retry_delay: Duration,
    /// Consecutive failed attempts allowed before going terminal.
    pub max_retries: u32,
    /// Interval between liveness probes once authenticated.
    pub ping_interval: Duration,
    /// Deadline for each liveness probe.
    pub probe_timeout: Duration,
    /// Deadline for the challenge round trip.
    pub auth_timeout: Duration,
    /// How long the transient `Connected` state stays visible.
    pub connected_display_delay: Duration,
    /// How long the transient `Error` state stays visible.
    pub error_display_delay: Duration,
}

impl ClientConfig {
    /// Creates a configuration with the reference defaults.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            secret: secret.into(),
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY,
            max_retries: DEFAULT_MAX_RETRIES,
            ping_interval: DEFAULT_PING_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            connected_display_delay: DEFAULT_DISPLAY_DELAY,
            error_display_delay: DEFAULT_DISPLAY_DELAY,
        }
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Status observer; receives every status payload verbatim.
type StatusSink = Box<dyn Fn(Value) + Send + Sync>;

/// Notice observer; receives recoverable diagnostic messages.
type NoticeSink = Box<dyn Fn(String) + Send + Sync>;

/// Credential-rejection observer.
type RejectedSink = Box<dyn Fn() + Send + Sync>;

/// Single-slot observer registry. Registering replaces the previous
/// observer; there is never more than one per kind.
#[derive(Default)]
struct Sinks {
    status: Mutex<Option<StatusSink>>,
    notice: Mutex<Option<NoticeSink>>,
    rejected: Mutex<Option<RejectedSink>>,
}

impl Sinks {
    fn emit_status(&self, payload: Value) {
        if let Some(sink) = &*self.status.lock() {
            sink(payload);
        }
    }

    fn emit_notice(&self, message: String) {
        if let Some(sink) = &*self.notice.lock() {
            sink(message);
        }
    }

    fn emit_rejected(&self) {
        if let Some(sink) = &*self.rejected.lock() {
            sink();
        }
    }
}

// ============================================================================
// Shared
// ============================================================================

/// State shared between the client, the supervisor task, and the event loop
/// callbacks.
struct Shared {
    /// Observable connection state.
    state: StateCell,
    /// Registered observers.
    sinks: Sinks,
    /// Handle of the live connection generation, if any.
    handle: Mutex<Option<ConnectionHandle>>,
    /// Set by [`KettleClient::close`]; suppresses auto-reconnect.
    intentional_close: AtomicBool,
    /// Set when the device rejected the credential; suppresses auto-reconnect.
    unauthorized: AtomicBool,
    /// Guards the at-most-once credential-rejected callback.
    rejected_fired: AtomicBool,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: StateCell::new(),
            sinks: Sinks::default(),
            handle: Mutex::new(None),
            intentional_close: AtomicBool::new(false),
            unauthorized: AtomicBool::new(false),
            rejected_fired: AtomicBool::new(false),
        }
    }

    fn reconnect_suppressed(&self) -> bool {
        self.intentional_close.load(Ordering::SeqCst) || self.unauthorized.load(Ordering::SeqCst)
    }
}

// ============================================================================
// SessionEvents
// ============================================================================

/// Bridges connection-generation events to client state and sinks.
struct SessionEvents {
    shared: Arc<Shared>,
    connected_display_delay: Duration,
    error_display_delay: Duration,
}

impl ConnectionEvents for SessionEvents {
    fn on_authenticated(&self) {
        self.shared
            .state
            .set_transient(ConnectionState::Connected, self.connected_display_delay);
    }

    fn on_credential_rejected(&self) {
        self.shared.unauthorized.store(true, Ordering::SeqCst);
        if !self.shared.rejected_fired.swap(true, Ordering::SeqCst) {
            self.shared.sinks.emit_rejected();
        }
    }

    fn on_status(&self, payload: Value) {
        self.shared.sinks.emit_status(payload);
    }

    fn on_notice(&self, message: String) {
        self.shared.sinks.emit_notice(message);
        self.shared
            .state
            .set_transient(ConnectionState::Error, self.error_display_delay);
    }
}

// ============================================================================
// KettleClient
// ============================================================================

/// Persistent-connection client for the kettle controller.
///
/// Owns the connection state machine and composes the tracker, handshake,
/// liveness probing, and reconnect policy. Constructed once per session;
/// call [`init`](Self::init) to connect and [`close`](Self::close) to
/// disconnect without reconnecting.
pub struct KettleClient {
    endpoint: Url,
    config: ClientConfig,
    shared: Arc<Shared>,
    /// Supervisor task for the current session, if any.
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for KettleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KettleClient")
            .field("endpoint", &self.endpoint)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl KettleClient {
    /// Creates a client for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the endpoint is not a valid `ws://` or
    /// `wss://` URL.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| Error::config(format!("invalid endpoint '{}': {e}", config.endpoint)))?;

        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "endpoint must be ws:// or wss://, got '{}'",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            endpoint,
            config,
            shared: Arc::new(Shared::new()),
            runner: Mutex::new(None),
        })
    }

    // ========================================================================
    // Observers
    // ========================================================================

    /// Registers the status observer, replacing any previous one.
    ///
    /// Invoked with every status frame's payload, verbatim, and with the
    /// neutral all-off payload when the connection closes.
    pub fn on_status(&self, sink: impl Fn(Value) + Send + Sync + 'static) {
        *self.shared.sinks.status.lock() = Some(Box::new(sink));
    }

    /// Registers the state observer, replacing any previous one.
    pub fn on_state(&self, sink: impl Fn(ConnectionState) + Send + Sync + 'static) {
        self.shared.state.set_sink(Box::new(sink));
    }

    /// Registers the credential-rejected observer, replacing any previous
    /// one. Invoked at most once per session.
    pub fn on_credential_rejected(&self, sink: impl Fn() + Send + Sync + 'static) {
        *self.shared.sinks.rejected.lock() = Some(Box::new(sink));
    }

    /// Registers the notice observer, replacing any previous one.
    ///
    /// Notices are recoverable diagnostic conditions (parse failures, probe
    /// failures); the presentation layer owns display and dismissal.
    pub fn on_notice(&self, sink: impl Fn(String) + Send + Sync + 'static) {
        *self.shared.sinks.notice.lock() = Some(Box::new(sink));
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Returns the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    /// Starts (or resumes) the session.
    ///
    /// Spawns the supervisor task that connects, authenticates, and
    /// reconnects with linear backoff. A no-op while a session is already
    /// running. After a terminal close (intentional, credential rejection,
    /// or retry ceiling) this resumes with a fresh retry budget.
    ///
    /// Must be called within a tokio runtime.
    pub fn init(&self) {
        let mut runner = self.runner.lock();
        if let Some(task) = &*runner
            && !task.is_finished()
        {
            debug!("Session already running");
            return;
        }

        self.shared.intentional_close.store(false, Ordering::SeqCst);
        self.shared.unauthorized.store(false, Ordering::SeqCst);
        self.shared.rejected_fired.store(false, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let endpoint = self.endpoint.clone();
        let params = SessionParams {
            secret: self.config.secret.clone(),
            auth_timeout: self.config.auth_timeout,
            ping_interval: self.config.ping_interval,
            probe_timeout: self.config.probe_timeout,
        };
        let policy = ReconnectPolicy::new(self.config.base_retry_delay, self.config.max_retries);
        let events = Arc::new(SessionEvents {
            shared: Arc::clone(&self.shared),
            connected_display_delay: self.config.connected_display_delay,
            error_display_delay: self.config.error_display_delay,
        });

        *runner = Some(tokio::spawn(run_session(
            shared, endpoint, params, policy, events,
        )));
    }

    /// Closes the connection intentionally.
    ///
    /// Unlike a network-initiated close, this never triggers auto-reconnect.
    /// A later [`init`](Self::init) resumes the session.
    pub fn close(&self) {
        self.shared.intentional_close.store(true, Ordering::SeqCst);

        let handle = self.shared.handle.lock().clone();
        match handle {
            Some(handle) => handle.shutdown(),
            // Nothing live; settle the observable state here.
            None => self.shared.state.set(ConnectionState::Closed),
        }
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Presses a front-panel button on the device.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if no connection is live
    /// - [`Error::Timeout`] if the device does not answer in time
    /// - [`Error::Application`] if the device rejects the command
    pub async fn press_button(&self, button: ButtonId) -> Result<Value> {
        self.request(
            ops::BUTTON_PRESS,
            button.into(),
            Some(DEFAULT_REQUEST_TIMEOUT),
        )
        .await
    }

    /// Sends an arbitrary operation and awaits its response.
    ///
    /// # Errors
    ///
    /// Same as [`press_button`](Self::press_button), plus
    /// [`Error::Authentication`] after the device rejected the credential.
    pub async fn request(
        &self,
        operation: impl Into<String>,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        if self.shared.unauthorized.load(Ordering::SeqCst) {
            return Err(Error::Authentication);
        }

        let handle = self.shared.handle.lock().clone();
        match handle {
            Some(handle) => handle.request(operation, payload, timeout).await,
            None => Err(Error::ConnectionClosed),
        }
    }
}

impl Drop for KettleClient {
    fn drop(&mut self) {
        if let Some(handle) = self.shared.handle.lock().take() {
            handle.shutdown();
        }
        if let Some(task) = self.runner.lock().take() {
            task.abort();
        }
    }
}

// ============================================================================
// Session Supervisor
// ============================================================================

/// Connects, runs connection generations, and reconnects with backoff until
/// a terminal condition.
async fn run_session(
    shared: Arc<Shared>,
    endpoint: Url,
    params: SessionParams,
    mut policy: ReconnectPolicy,
    events: Arc<SessionEvents>,
) {
    loop {
        if shared.reconnect_suppressed() {
            shared.state.set(ConnectionState::Closed);
            return;
        }

        shared.state.set(ConnectionState::Connecting);

        match Connection::open(&endpoint, params.clone(), events.clone()).await {
            Ok(connection) => {
                // close() may have landed while the dial was in flight; hang
                // up the fresh connection instead of authenticating on it.
                if shared.reconnect_suppressed() {
                    debug!("Session closed by caller during connect");
                    connection.handle().shutdown();
                    connection.join().await;
                    shared.state.set(ConnectionState::Closed);
                    return;
                }

                // Transport-level open: the device has not authenticated us
                // yet, but the retry budget starts over.
                policy.record_open();
                *shared.handle.lock() = Some(connection.handle());

                let reason = connection.join().await;

                shared.handle.lock().take();
                shared.sinks.emit_status(StatusReport::neutral());
                shared.state.set(ConnectionState::Closed);

                match reason {
                    CloseReason::Shutdown => {
                        debug!("Session closed by caller");
                        return;
                    }
                    CloseReason::Unauthorized => {
                        warn!("Session terminated: credential rejected");
                        return;
                    }
                    CloseReason::Remote | CloseReason::Transport(_) => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Connection attempt failed");
                events.on_notice(format!("Connection failed: {e}"));
                shared.state.set(ConnectionState::Closed);
            }
        }

        if shared.reconnect_suppressed() {
            shared.state.set(ConnectionState::Closed);
            return;
        }

        match policy.next_delay() {
            Some(delay) => {
                debug!(attempt = policy.retry_count(), ?delay, "Scheduling reconnect");
                tokio::time::sleep(delay).await;

                if shared.reconnect_suppressed() {
                    shared.state.set(ConnectionState::Closed);
                    return;
                }
            }
            None => {
                error!("Failed to reconnect after several attempts");
                shared
                    .sinks
                    .emit_notice("Failed to reconnect after several attempts".to_string());
                shared.state.set(ConnectionState::Closed);
                return;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ClientConfig {
        ClientConfig::new("ws://127.0.0.1:9/", "pw")
    }

    #[test]
    fn test_config_defaults() {
        let config = test_config();
        assert_eq!(config.base_retry_delay, Duration::from_secs(2));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.ping_interval, Duration::from_secs(30));
        assert_eq!(config.probe_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_endpoint_is_config_error() {
        let err = KettleClient::new(ClientConfig::new("not a url", "pw")).expect_err("invalid");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_non_websocket_scheme_is_config_error() {
        let err = KettleClient::new(ClientConfig::new("http://kettle.local/", "pw"))
            .expect_err("wrong scheme");
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_initial_state_is_uninitialized() {
        let client = KettleClient::new(test_config()).expect("client");
        assert_eq!(client.state(), ConnectionState::Uninitialized);
    }

    #[tokio::test]
    async fn test_request_without_connection_is_connection_closed() {
        let client = KettleClient::new(test_config()).expect("client");
        let err = client
            .press_button(ButtonId::Power)
            .await
            .expect_err("no connection");
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_close_without_session_settles_closed() {
        let client = KettleClient::new(test_config()).expect("client");
        client.close();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_exhausts_retries() {
        // Port 9 (discard) with nothing listening: connects fail fast.
        let mut config = test_config();
        config.base_retry_delay = Duration::from_millis(1);
        config.max_retries = 2;

        let client = KettleClient::new(config).expect("client");
        let notices = Arc::new(Mutex::new(Vec::new()));
        let sink_notices = Arc::clone(&notices);
        client.on_notice(move |message| sink_notices.lock().push(message));

        client.init();

        // Wait for the supervisor to give up.
        for _ in 0..500 {
            if client.state() == ConnectionState::Closed
                && notices
                    .lock()
                    .iter()
                    .any(|n| n.contains("Failed to reconnect"))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(client.state(), ConnectionState::Closed);
        assert!(
            notices
                .lock()
                .iter()
                .any(|n| n.contains("Failed to reconnect"))
        );
    }

    #[tokio::test]
    async fn test_init_is_idempotent_while_running() {
        let mut config = test_config();
        config.base_retry_delay = Duration::from_millis(50);

        let client = KettleClient::new(config).expect("client");
        client.init();
        client.init();

        assert!(client.runner.lock().is_some());
        client.close();
    }
}
