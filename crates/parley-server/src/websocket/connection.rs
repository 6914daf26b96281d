//! Per-connection state: the handle shared with the room registry and the
//! bounded outbound queue drained by the connection's writer task.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use parley_core::{ConnectionId, Identity, RelayError, RoomId, close_code};
use parley_settings::OverflowPolicy;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a connection.
///
/// `Connecting → Open → Closing → Closed`; `Closed` is reachable from every
/// other state and is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Upgraded, not yet admitted to its room.
    Connecting,
    /// Member of its room, relaying frames.
    Open,
    /// A close has been requested; no further frames are routed.
    Closing,
    /// Gone from the registry. Terminal.
    Closed,
}

impl ConnectionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open)
                | (Self::Open, Self::Closing)
                | (Self::Connecting | Self::Open | Self::Closing, Self::Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Close code and reason sent to the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseReason {
    /// RFC 6455 close code.
    pub code: u16,
    /// Short reason text (never contains rejection details).
    pub reason: String,
}

impl CloseReason {
    /// Build a close reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Normal closure (1000).
    pub fn normal() -> Self {
        Self::new(close_code::NORMAL, "")
    }

    /// Server shutting down (1001).
    pub fn going_away() -> Self {
        Self::new(close_code::GOING_AWAY, "server shutting down")
    }

    /// Peer stopped answering pings (1001).
    pub fn heartbeat_timeout() -> Self {
        Self::new(close_code::GOING_AWAY, "heartbeat timeout")
    }

    /// Close reason for a fatal relay error.
    ///
    /// Authorization failures carry no reason text. Transport failures map to
    /// the abnormal-closure code, which is logged but never put on the wire.
    pub fn from_error(err: &RelayError) -> Self {
        match err {
            RelayError::Authorization { .. } => Self::new(close_code::POLICY_VIOLATION, ""),
            RelayError::Transport { .. } => Self::new(close_code::ABNORMAL, err.code()),
            _ => Self::new(
                err.close_code().unwrap_or(close_code::NORMAL),
                err.code(),
            ),
        }
    }

    /// Whether a close frame should be sent for this reason.
    pub fn is_sendable(&self) -> bool {
        self.code != close_code::ABNORMAL
    }
}

/// Result of offering a frame to an [`OutboundQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// The frame was queued.
    Queued,
    /// The queue was full; the oldest frame was discarded and this one queued.
    DroppedOldest,
    /// The queue was full and the policy is `disconnect`; nothing was queued.
    Overflow,
    /// The queue is closed; nothing was queued.
    Closed,
}

/// Next item for the writer task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outbound {
    /// A text frame to send.
    Frame(Arc<str>),
    /// Send a close frame and stop.
    Close(CloseReason),
}

struct QueueState {
    frames: VecDeque<Arc<str>>,
    closed: Option<CloseReason>,
}

/// Bounded FIFO of frames waiting for the writer.
///
/// Producers never wait: a full queue resolves immediately per
/// [`OverflowPolicy`]. A single consumer awaits [`OutboundQueue::next`].
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                frames: VecDeque::new(),
                closed: None,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of queued frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// Whether no frames are queued.
    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    /// Enqueue a frame, applying `policy` if the queue is full.
    pub fn push(&self, frame: Arc<str>, policy: OverflowPolicy) -> PushOutcome {
        let outcome = {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return PushOutcome::Closed;
            }
            if state.frames.len() < self.capacity {
                state.frames.push_back(frame);
                PushOutcome::Queued
            } else {
                match policy {
                    OverflowPolicy::Disconnect => return PushOutcome::Overflow,
                    OverflowPolicy::DropOldest => {
                        let _ = state.frames.pop_front();
                        state.frames.push_back(frame);
                        PushOutcome::DroppedOldest
                    }
                }
            }
        };
        self.notify.notify_one();
        outcome
    }

    /// Enqueue only if there is room. Used for best-effort diagnostics.
    pub fn offer(&self, frame: Arc<str>) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed.is_some() || state.frames.len() >= self.capacity {
                return false;
            }
            state.frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Close the queue, discarding pending frames.
    ///
    /// Returns `false` if the queue was already closed (the first reason wins).
    pub fn close(&self, reason: CloseReason) -> bool {
        self.close_inner(reason, true)
    }

    /// Close the queue after the pending frames have been written.
    pub fn close_after_pending(&self, reason: CloseReason) -> bool {
        self.close_inner(reason, false)
    }

    fn close_inner(&self, reason: CloseReason, discard: bool) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return false;
            }
            if discard {
                state.frames.clear();
            }
            state.closed = Some(reason);
        }
        self.notify.notify_one();
        true
    }

    /// The reason the queue was closed with, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.state.lock().closed.clone()
    }

    /// Wait for the next frame, or the close once the queue has drained.
    pub async fn next(&self) -> Outbound {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(frame) = state.frames.pop_front() {
                    return Outbound::Frame(frame);
                }
                if let Some(reason) = &state.closed {
                    return Outbound::Close(reason.clone());
                }
            }
            self.notify.notified().await;
        }
    }
}

/// A connection as seen by the registry and router.
///
/// The servicing task owns the transport; everyone else holds this handle
/// through an `Arc` and talks to the peer only through the outbound queue.
pub struct ConnectionHandle {
    id: ConnectionId,
    room: RoomId,
    identity: Option<Identity>,
    joined_at: DateTime<Utc>,
    connected_at: Instant,
    queue: OutboundQueue,
    state: Mutex<ConnectionState>,
    last_activity_ms: AtomicU64,
    dropped_frames: AtomicU64,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle in the `Connecting` state.
    ///
    /// `cancel` should be a child of the server shutdown token.
    pub fn new(
        room: RoomId,
        identity: Option<Identity>,
        queue_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            room,
            identity,
            joined_at: Utc::now(),
            connected_at: Instant::now(),
            queue: OutboundQueue::new(queue_capacity),
            state: Mutex::new(ConnectionState::Connecting),
            last_activity_ms: AtomicU64::new(0),
            dropped_frames: AtomicU64::new(0),
            cancel,
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The room this connection was opened for.
    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Identity attached by the auth layer, if any.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// When the connection was accepted.
    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn transition(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        if state.can_transition_to(next) {
            *state = next;
            true
        } else {
            false
        }
    }

    /// The outbound queue.
    pub fn queue(&self) -> &OutboundQueue {
        &self.queue
    }

    /// Enqueue a frame for the peer.
    pub fn send(&self, frame: Arc<str>, policy: OverflowPolicy) -> PushOutcome {
        let outcome = self.queue.push(frame, policy);
        if matches!(outcome, PushOutcome::DroppedOldest | PushOutcome::Overflow) {
            let _ = self.dropped_frames.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    /// Frames this connection lost to a full queue.
    pub fn drop_count(&self) -> u64 {
        self.dropped_frames.load(Ordering::Relaxed)
    }

    /// Close from outside the servicing task.
    ///
    /// Pending frames are discarded, the close frame is queued, and the
    /// servicing task is cancelled so it runs its cleanup.
    pub fn evict(&self, reason: CloseReason) {
        let _ = self.queue.close(reason);
        self.cancel.cancel();
    }

    /// Reason recorded by the first close, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.queue.close_reason()
    }

    /// This connection's cancellation token.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Note inbound activity (any frame, including pongs).
    pub fn record_activity(&self) {
        let ms = u64::try_from(self.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        let _ = self.last_activity_ms.fetch_max(ms, Ordering::Relaxed);
    }

    /// When the peer was last heard from (the accept time if never).
    pub fn last_activity(&self) -> Instant {
        self.connected_at + Duration::from_millis(self.last_activity_ms.load(Ordering::Relaxed))
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("room", &self.room)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
