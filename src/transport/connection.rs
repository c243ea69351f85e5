//! WebSocket connection and event loop.
//!
//! One [`Connection`] is one connection generation: a single WebSocket to the
//! device, an event loop task that owns the write half and the request
//! tracker, and a cloneable [`ConnectionHandle`] for issuing requests.
//!
//! # Event Loop
//!
//! The loop multiplexes three sources, one at a time, to completion:
//!
//! - Inbound frames from the device (challenge, response, status)
//! - Commands from handles (send, expiry, shutdown, auth/probe outcomes)
//! - The liveness interval, active only once authenticated
//!
//! The tracker and the WebSocket sink are owned exclusively by the loop task,
//! so request state needs no locking. The challenge round trip and each
//! liveness probe await their responses in small spawned tasks and feed the
//! outcome back into the loop as a command.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, from_str, to_string};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::auth;
use crate::error::{Error, Result};
use crate::protocol::{InboundFrame, OutboundFrame, Payload, ops};

use super::tracker::{RequestTracker, ResponseSender};

// ============================================================================
// Types
// ============================================================================

/// Client-side WebSocket stream to the device.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of the stream, owned by the event loop.
type WsSink = SplitSink<WsStream, Message>;

// ============================================================================
// SessionParams
// ============================================================================

/// Per-generation parameters handed down from the client configuration.
#[derive(Debug, Clone)]
pub(crate) struct SessionParams {
    /// Shared secret used to answer the challenge.
    pub(crate) secret: String,
    /// Deadline for the challenge round trip.
    pub(crate) auth_timeout: Duration,
    /// Interval between liveness probes once authenticated.
    pub(crate) ping_interval: Duration,
    /// Deadline for each liveness probe.
    pub(crate) probe_timeout: Duration,
}

// ============================================================================
// ConnectionEvents
// ============================================================================

/// Callbacks from a connection generation to its owner.
///
/// All methods are invoked from the event loop task (or a task it spawned)
/// and must not block.
pub(crate) trait ConnectionEvents: Send + Sync + 'static {
    /// The challenge round trip succeeded; the session is authenticated.
    fn on_authenticated(&self);

    /// The device rejected the hashed credential.
    fn on_credential_rejected(&self);

    /// Unsolicited status push, forwarded verbatim.
    fn on_status(&self, payload: Value);

    /// Recoverable diagnostic condition (parse failure, probe failure).
    fn on_notice(&self, message: String);
}

// ============================================================================
// Command
// ============================================================================

/// Internal commands for the event loop.
enum Command {
    /// Send a request; the response settles `response_tx`.
    Send {
        operation: String,
        payload: Payload,
        timeout: Option<Duration>,
        response_tx: ResponseSender,
    },
    /// A request's deadline elapsed.
    Expire {
        id: u64,
        operation: String,
        timeout_ms: u64,
    },
    /// The challenge round trip finished.
    AuthOutcome(Result<Value>),
    /// A liveness probe failed; the connection is considered dead.
    ProbeFailed(Error),
    /// Close the connection intentionally.
    Shutdown,
}

// ============================================================================
// CloseReason
// ============================================================================

/// Why a connection generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CloseReason {
    /// The device closed the connection or the stream ended.
    Remote,
    /// A transport-level failure (socket error, dead probe, failed handshake
    /// round trip).
    Transport(String),
    /// The device rejected the credential; do not reconnect.
    Unauthorized,
    /// Caller-initiated shutdown; do not reconnect.
    Shutdown,
}

// ============================================================================
// ConnectionHandle
// ============================================================================

/// Cloneable handle for issuing requests on a connection generation.
#[derive(Clone)]
pub(crate) struct ConnectionHandle {
    command_tx: mpsc::UnboundedSender<Command>,
}

impl ConnectionHandle {
    /// Sends an operation and awaits its response.
    ///
    /// With a `timeout`, the pending entry is removed on expiry and the
    /// caller gets [`Error::Timeout`]; a response arriving later is logged
    /// as unmatched and dropped.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the generation is gone or closes
    ///   while the request is pending
    /// - [`Error::Timeout`] if the deadline elapses first
    /// - [`Error::Application`] if the device answers with an error payload
    pub(crate) async fn request(
        &self,
        operation: impl Into<String>,
        payload: Payload,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let (response_tx, response_rx) = oneshot::channel();

        self.command_tx
            .send(Command::Send {
                operation: operation.into(),
                payload,
                timeout,
                response_tx,
            })
            .map_err(|_| Error::ConnectionClosed)?;

        response_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Asks the event loop to close the connection.
    pub(crate) fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One connection generation to the device.
pub(crate) struct Connection {
    handle: ConnectionHandle,
    task: JoinHandle<CloseReason>,
}

impl Connection {
    /// Opens the WebSocket and spawns the event loop task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the connection cannot be established.
    pub(crate) async fn open(
        endpoint: &Url,
        params: SessionParams,
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<Self> {
        let (ws_stream, _response) = connect_async(endpoint.as_str()).await?;
        debug!(endpoint = %endpoint, "WebSocket open");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            command_tx: command_tx.clone(),
        };

        let task = tokio::spawn(run_event_loop(
            ws_stream,
            command_rx,
            command_tx,
            handle.clone(),
            params,
            events,
        ));

        Ok(Self { handle, task })
    }

    /// Returns a handle for issuing requests.
    pub(crate) fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Waits for the generation to end and reports why.
    pub(crate) async fn join(self) -> CloseReason {
        match self.task.await {
            Ok(reason) => reason,
            Err(e) => CloseReason::Transport(format!("event loop failed: {e}")),
        }
    }
}

// ============================================================================
// Event Loop
// ============================================================================

/// Runs one connection generation to completion.
async fn run_event_loop(
    ws_stream: WsStream,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    command_tx: mpsc::UnboundedSender<Command>,
    handle: ConnectionHandle,
    params: SessionParams,
    events: Arc<dyn ConnectionEvents>,
) -> CloseReason {
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut tracker = RequestTracker::new();
    let mut authenticated = false;
    let mut auth_task: Option<JoinHandle<()>> = None;
    let mut probe_task: Option<JoinHandle<()>> = None;

    // First tick one full interval after authentication, not immediately.
    let mut ping = interval_at(
        Instant::now() + params.ping_interval,
        params.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            // Inbound frames from the device
            message = ws_read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(
                            &text,
                            &mut tracker,
                            &mut auth_task,
                            &handle,
                            &command_tx,
                            &params,
                            &events,
                        );
                    }

                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        break CloseReason::Remote;
                    }

                    Some(Err(e)) => {
                        error!(error = %e, "WebSocket error");
                        events.on_notice(format!("Connection error: {e}"));
                        break CloseReason::Transport(e.to_string());
                    }

                    None => {
                        debug!("WebSocket stream ended");
                        break CloseReason::Remote;
                    }

                    // Ignore Binary, Ping, Pong
                    _ => {}
                }
            }

            // Commands from handles and helper tasks
            command = command_rx.recv() => {
                match command {
                    Some(Command::Send { operation, payload, timeout, response_tx }) => {
                        handle_send(
                            operation,
                            payload,
                            timeout,
                            response_tx,
                            &mut ws_write,
                            &mut tracker,
                            &command_tx,
                        ).await;
                    }

                    Some(Command::Expire { id, operation, timeout_ms }) => {
                        if tracker.fail(id, Error::timeout(&operation, timeout_ms)) {
                            debug!(id, operation = %operation, "Request expired");
                        }
                    }

                    Some(Command::AuthOutcome(outcome)) => match outcome {
                        Ok(_) => {
                            debug!("Handshake accepted");
                            authenticated = true;
                            ping.reset();
                            events.on_authenticated();
                        }
                        Err(Error::Application { message }) => {
                            warn!(message = %message, "Credential rejected by device");
                            events.on_credential_rejected();
                            let _ = ws_write.close().await;
                            break CloseReason::Unauthorized;
                        }
                        Err(e) => {
                            warn!(error = %e, "Handshake did not complete");
                            events.on_notice(format!("Handshake failed: {e}"));
                            let _ = ws_write.close().await;
                            break CloseReason::Transport(e.to_string());
                        }
                    },

                    Some(Command::ProbeFailed(e)) => {
                        warn!(error = %e, "No pong received, restarting connection");
                        events.on_notice("No pong received: restarting connection".to_string());
                        let _ = ws_write.close().await;
                        break CloseReason::Transport(e.to_string());
                    }

                    Some(Command::Shutdown) => {
                        debug!("Shutdown command received");
                        let _ = ws_write.close().await;
                        break CloseReason::Shutdown;
                    }

                    None => break CloseReason::Shutdown,
                }
            }

            // Liveness probe, only while authenticated
            _ = ping.tick(), if authenticated => {
                // A probe still unanswered at the next tick means the
                // connection is dead even if its own deadline has not
                // fired, which happens whenever the ping interval is
                // shorter than the probe timeout.
                if let Some(task) = &probe_task
                    && !task.is_finished()
                {
                    let waited_ms = params.ping_interval.as_millis() as u64;
                    let _ = command_tx.send(Command::ProbeFailed(Error::timeout(
                        ops::PING,
                        waited_ms,
                    )));
                } else {
                    let probe_handle = handle.clone();
                    let probe_tx = command_tx.clone();
                    let probe_timeout = params.probe_timeout;

                    probe_task = Some(tokio::spawn(async move {
                        trace!("Liveness probe");
                        if let Err(e) = probe_handle
                            .request(ops::PING, Payload::Null, Some(probe_timeout))
                            .await
                        {
                            let _ = probe_tx.send(Command::ProbeFailed(e));
                        }
                    }));
                }
            }
        }
    };

    // Stop timers tied to this generation before settling its requests.
    if let Some(task) = auth_task.take() {
        task.abort();
    }
    if let Some(task) = probe_task.take() {
        task.abort();
    }
    tracker.reject_all();

    debug!(?reason, "Event loop terminated");
    reason
}

// ============================================================================
// Frame Handling
// ============================================================================

/// Demultiplexes one inbound text frame.
///
/// Malformed frames are logged and surfaced as a notice; they never change
/// connection state.
fn handle_frame(
    text: &str,
    tracker: &mut RequestTracker,
    auth_task: &mut Option<JoinHandle<()>>,
    handle: &ConnectionHandle,
    command_tx: &mpsc::UnboundedSender<Command>,
    params: &SessionParams,
    events: &Arc<dyn ConnectionEvents>,
) {
    let frame = match from_str::<InboundFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            let error = Error::protocol(e.to_string());
            warn!(error = %error, "Failed to parse incoming frame");
            events.on_notice(format!("Error while processing message: {error}"));
            return;
        }
    };

    match frame {
        InboundFrame::Challenge { nonce } => {
            trace!("Challenge received");
            if let Some(task) = auth_task.take() {
                task.abort();
            }

            let digest = auth::challenge_digest(&params.secret, &nonce);
            let auth_handle = handle.clone();
            let auth_tx = command_tx.clone();
            let auth_timeout = params.auth_timeout;

            *auth_task = Some(tokio::spawn(async move {
                let outcome = auth_handle
                    .request(ops::CHALLENGE, Payload::Text(digest), Some(auth_timeout))
                    .await;
                let _ = auth_tx.send(Command::AuthOutcome(outcome));
            }));
        }

        InboundFrame::Response { id, data, error } => {
            tracker.settle(id, data, error);
        }

        InboundFrame::Status { data } => {
            events.on_status(data);
        }
    }
}

// ============================================================================
// Send Handling
// ============================================================================

/// Assigns an id, registers the pending entry, and writes the frame.
async fn handle_send(
    operation: String,
    payload: Payload,
    timeout: Option<Duration>,
    response_tx: ResponseSender,
    ws_write: &mut WsSink,
    tracker: &mut RequestTracker,
    command_tx: &mpsc::UnboundedSender<Command>,
) {
    let id = tracker.register(response_tx);
    let frame = OutboundFrame::new(operation.clone(), payload, id);

    let json = match to_string(&frame) {
        Ok(json) => json,
        Err(e) => {
            tracker.fail(id, Error::Json(e));
            return;
        }
    };

    if let Some(timeout) = timeout {
        let timer_tx = command_tx.clone();
        let timer_operation = operation.clone();
        let timeout_ms = timeout.as_millis() as u64;

        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = timer_tx.send(Command::Expire {
                id,
                operation: timer_operation,
                timeout_ms,
            });
        });
        tracker.attach_timer(id, timer.abort_handle());
    }

    if let Err(e) = ws_write.send(Message::Text(json.into())).await {
        tracker.fail(id, Error::connection(e.to_string()));
        return;
    }

    trace!(id, operation = %operation, "Request sent");
}

// ============================================================================
// Tests
// ============================================================================
