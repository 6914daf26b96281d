//! Connection gateway: the `/ws/signaling/{room}` upgrade handler.
//!
//! Validates the handshake before anything is registered: the room
//! identifier (HTTP 400 on failure), the `Host`/`Origin` allow-list and the
//! identity requirement (policy-violation close), and the global connection
//! cap (try-again-later close). Admitted sockets are handed to
//! [`run_connection`].

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::Extension;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use parley_core::{Identity, RelayError, RoomId};
use tracing::{debug, info, warn};

use super::connection::{CloseReason, ConnectionHandle};
use super::lifecycle::run_connection;
use crate::metrics::WS_REJECTIONS_TOTAL;
use crate::server::AppState;

/// Caps the number of concurrently serviced sockets.
pub struct ConnectionLimiter {
    active: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    /// Allow at most `max` concurrent connections.
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
        }
    }

    /// Reserve a slot, or `None` if the server is full.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()
            .map(|_| ConnectionPermit {
                limiter: Arc::clone(self),
            })
    }

    /// Sockets currently holding a slot.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Configured maximum.
    pub fn max(&self) -> usize {
        self.max
    }
}

/// A reserved connection slot, released on drop.
pub struct ConnectionPermit {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        let _ = self.limiter.active.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Why a handshake was refused after the upgrade.
fn admission_error(
    state: &AppState,
    headers: &HeaderMap,
    identity: Option<&Identity>,
) -> Option<RelayError> {
    if let Err(err) = state.allow_list.check(headers) {
        return Some(err);
    }
    if state.config.require_identity && identity.is_none() {
        return Some(RelayError::authorization("identity required"));
    }
    None
}

/// GET `/ws/signaling/{room}`: `WebSocket` upgrade.
pub async fn signaling_handler(
    State(state): State<AppState>,
    Path(room): Path<String>,
    headers: HeaderMap,
    identity: Option<Extension<Identity>>,
    ws: WebSocketUpgrade,
) -> Response {
    let room = match RoomId::parse(&room) {
        Ok(room) => room,
        Err(err) => {
            debug!(error = %err, "invalid room identifier");
            counter!(WS_REJECTIONS_TOTAL, "reason" => "bad_room").increment(1);
            return (StatusCode::BAD_REQUEST, err.to_string()).into_response();
        }
    };
    let identity = identity.map(|Extension(identity)| identity);
    let limit = state.config.transport_frame_limit();
    let ws = ws.max_message_size(limit).max_frame_size(limit);

    if let Some(err) = admission_error(&state, &headers, identity.as_ref()) {
        warn!(%room, error = %err, "handshake refused");
        counter!(WS_REJECTIONS_TOTAL, "reason" => "unauthorized").increment(1);
        return ws
            .on_upgrade(move |socket| refuse(socket, CloseReason::from_error(&err)))
            .into_response();
    }

    let Some(permit) = state.limiter.try_acquire() else {
        let err = RelayError::server_full(state.limiter.max());
        warn!(%room, error = %err, "handshake refused");
        counter!(WS_REJECTIONS_TOTAL, "reason" => "server_full").increment(1);
        return ws
            .on_upgrade(move |socket| refuse(socket, CloseReason::from_error(&err)))
            .into_response();
    };

    ws.on_upgrade(move |socket| async move {
        let handle = Arc::new(ConnectionHandle::new(
            room,
            identity,
            state.config.outbound_queue_capacity,
            state.shutdown.child_token(),
        ));
        info!(conn_id = %handle.id(), room = %handle.room(), "client connected");
        run_connection(socket, handle, state.router.clone(), state.heartbeat).await;
        drop(permit);
    })
    .into_response()
}

/// Close an upgraded socket without ever registering it.
async fn refuse(mut socket: WebSocket, reason: CloseReason) {
    let frame = CloseFrame {
        code: reason.code,
        reason: reason.reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
