//! Connection lifecycle. Drives one admitted connection from room join
//! through close, and guarantees it leaves the registry on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use parley_core::{RelayError, Result};
use tokio_tungstenite::tungstenite::{self, error::CapacityError};
use tracing::{debug, info, instrument, warn};

use super::connection::{CloseReason, ConnectionHandle, ConnectionState, Outbound};
use super::heartbeat::until_unresponsive;
use super::registry::RoomRegistry;
use super::router::MessageRouter;
use crate::metrics::{WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL};

/// How long to wait for the writer to flush the close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Heartbeat timing for a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HeartbeatTiming {
    /// Interval between server Ping frames.
    pub interval: Duration,
    /// Close after this long without inbound activity.
    pub timeout: Duration,
}

impl Default for HeartbeatTiming {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(90),
        }
    }
}

/// Scoped room membership.
///
/// Dropping the guard leaves the room and marks the connection `Closed`,
/// whether the task returned normally, errored, or was cancelled.
pub struct MembershipGuard {
    registry: Arc<RoomRegistry>,
    handle: Arc<ConnectionHandle>,
}

impl MembershipGuard {
    /// Join `handle` to its room.
    pub fn join(
        registry: Arc<RoomRegistry>,
        handle: Arc<ConnectionHandle>,
    ) -> Result<Self> {
        registry.join(handle.room(), handle.clone())?;
        let _ = handle.transition(ConnectionState::Open);
        Ok(Self { registry, handle })
    }
}

impl Drop for MembershipGuard {
    fn drop(&mut self) {
        if self.registry.leave(self.handle.room(), self.handle.id()) {
            debug!(conn_id = %self.handle.id(), room = %self.handle.room(), "left room");
        }
        let _ = self.handle.transition(ConnectionState::Closed);
    }
}

/// Service an upgraded socket until it closes.
///
/// 1. Spawns the writer task that drains the outbound queue and sends pings
/// 2. Joins the room (a full room closes the socket with try-again-later)
/// 3. Routes inbound frames until the peer leaves, a fatal error occurs,
///    the heartbeat times out, or the connection is cancelled
/// 4. Queues the close frame, waits for the writer, and leaves the room
#[instrument(
    skip_all,
    fields(conn_id = %handle.id(), room = %handle.room(), close_code = tracing::field::Empty)
)]
pub async fn run_connection(
    socket: WebSocket,
    handle: Arc<ConnectionHandle>,
    router: Arc<MessageRouter>,
    timing: HeartbeatTiming,
) {
    let (ws_tx, ws_rx) = socket.split();
    let writer = tokio::spawn(run_writer(ws_tx, handle.clone(), timing.interval));

    let guard = match MembershipGuard::join(router.registry().clone(), handle.clone()) {
        Ok(guard) => guard,
        Err(err) => {
            warn!(error = %err, "room admission refused");
            if let Some(frame) = err.diagnostic_frame() {
                let _ = handle.queue().offer(frame.into());
            }
            let _ = handle.queue().close_after_pending(CloseReason::from_error(&err));
            let _ = handle.transition(ConnectionState::Closed);
            await_writer(writer).await;
            return;
        }
    };

    let started = Instant::now();
    info!(identity = ?handle.identity().map(|i| i.user_id.as_str()), "connection open");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let cancel = handle.cancel_token().clone();
    let close = tokio::select! {
        close = read_loop(ws_rx, &handle, &router) => close,
        () = until_unresponsive(&handle, timing.timeout) => {
            warn!("peer unresponsive, closing");
            CloseReason::heartbeat_timeout()
        }
        () = cancel.cancelled() => handle.close_reason().unwrap_or_else(CloseReason::going_away),
    };

    let _ = tracing::Span::current().record("close_code", close.code);
    let _ = handle.transition(ConnectionState::Closing);
    let _ = handle.queue().close_after_pending(close.clone());
    await_writer(writer).await;
    drop(guard);

    info!(reason = %close.reason, "connection closed");
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

/// Read inbound frames until the connection should close.
async fn read_loop(
    mut ws_rx: SplitStream<WebSocket>,
    handle: &ConnectionHandle,
    router: &MessageRouter,
) -> CloseReason {
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(err) => {
                let err = classify_read_error(err, router.policy().max_message_bytes);
                warn!(error = %err, "read failed, closing");
                if let Some(frame) = err.diagnostic_frame() {
                    let _ = handle.queue().offer(frame.into());
                }
                return CloseReason::from_error(&err);
            }
        };
        handle.record_activity();

        let routed = match msg {
            Message::Text(text) => router.route_text(handle, text.as_str()),
            Message::Binary(data) => router.route_binary(handle, &data),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(frame) => {
                debug!(code = ?frame.as_ref().map(|f| f.code), "peer sent close frame");
                return CloseReason::normal();
            }
        };

        if let Err(err) = routed {
            if err.is_fatal() {
                warn!(error = %err, "closing connection");
                if let Some(frame) = err.diagnostic_frame() {
                    let _ = handle.queue().offer(frame.into());
                }
                return CloseReason::from_error(&err);
            }
        }
    }
    CloseReason::normal()
}

/// Map a socket read error onto the relay taxonomy.
///
/// Frames the codec refuses for size are capacity errors (1009); anything
/// else means the transport is gone.
fn classify_read_error(err: axum::Error, limit: usize) -> RelayError {
    let inner = err.into_inner();
    match inner.downcast_ref::<tungstenite::Error>() {
        Some(tungstenite::Error::Capacity(CapacityError::MessageTooLong { size, .. })) => {
            RelayError::message_too_large(*size, limit)
        }
        Some(tungstenite::Error::Capacity(_)) => RelayError::frame_over_limit(limit),
        Some(_) => RelayError::transport(inner.to_string()),
        // axum may be built against a different tungstenite release.
        None if inner.to_string().starts_with("Space limit exceeded") => {
            RelayError::frame_over_limit(limit)
        }
        None => RelayError::transport(inner.to_string()),
    }
}

/// Drain the outbound queue into the socket, pinging on `ping_every`.
async fn run_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    handle: Arc<ConnectionHandle>,
    ping_every: Duration,
) {
    let mut ping_interval = tokio::time::interval(ping_every);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            next = handle.queue().next() => match next {
                Outbound::Frame(text) => {
                    if ws_tx.send(Message::Text(text.to_string().into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close(reason) if !reason.is_sendable() => break,
                Outbound::Close(reason) => {
                    let frame = CloseFrame {
                        code: reason.code,
                        reason: reason.reason.into(),
                    };
                    let _ = ws_tx.send(Message::Close(Some(frame))).await;
                    break;
                }
            },
            _ = ping_interval.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
    let _ = ws_tx.close().await;
}

async fn await_writer(writer: tokio::task::JoinHandle<()>) {
    let abort = writer.abort_handle();
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
        warn!("writer did not finish within {CLOSE_FLUSH_TIMEOUT:?}, aborting");
        abort.abort();
    }
}
