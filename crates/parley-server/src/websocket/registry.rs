//! Room registry: which connections are in which room.
//!
//! Rooms live in a sharded [`DashMap`]; every mutation of a room goes through
//! that room's entry lock, so concurrent joins and leaves on the same room
//! serialize while different rooms proceed independently. A room exists iff
//! it has at least one member.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use metrics::{counter, gauge};
use parley_core::{ConnectionId, RelayError, Result, RoomId};
use parley_settings::OverflowPolicy;
use tracing::{debug, warn};

use super::connection::{CloseReason, ConnectionHandle, PushOutcome};
use crate::metrics::{
    ROOMS_ACTIVE, SIGNAL_DELIVERIES_TOTAL, SIGNAL_QUEUE_DROPS_TOTAL, SIGNAL_SLOW_CONSUMERS_TOTAL,
};

type Members = HashMap<ConnectionId, Arc<ConnectionHandle>>;

/// Fan-out policy for [`RoomRegistry::publish`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FanoutPolicy {
    /// Deliver to the sender as well.
    pub echo_to_sender: bool,
    /// What to do with a recipient whose queue is full.
    pub overflow: OverflowPolicy,
}

impl Default for FanoutPolicy {
    fn default() -> Self {
        Self {
            echo_to_sender: true,
            overflow: OverflowPolicy::Disconnect,
        }
    }
}

/// What one [`RoomRegistry::publish`] call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Recipients the frame was queued for.
    pub delivered: usize,
    /// Recipients that lost an older frame to make room.
    pub dropped_oldest: usize,
    /// Recipients evicted because their queue was full.
    pub evicted: Vec<ConnectionId>,
}

/// In-memory room membership.
pub struct RoomRegistry {
    rooms: DashMap<RoomId, Members>,
    room_count: AtomicUsize,
    connection_count: AtomicUsize,
    max_room_members: usize,
}

impl RoomRegistry {
    /// Create a registry. `max_room_members == 0` means unlimited.
    pub fn new(max_room_members: usize) -> Self {
        Self {
            rooms: DashMap::new(),
            room_count: AtomicUsize::new(0),
            connection_count: AtomicUsize::new(0),
            max_room_members,
        }
    }

    /// Add `handle` to `room`, creating the room if absent.
    ///
    /// Joining twice is a no-op. Fails with a capacity error when the room
    /// already holds `max_room_members` other members.
    pub fn join(&self, room: &RoomId, handle: Arc<ConnectionHandle>) -> Result<()> {
        let mut members = self.rooms.entry(room.clone()).or_default();
        if members.contains_key(handle.id()) {
            return Ok(());
        }
        if self.max_room_members > 0 && members.len() >= self.max_room_members {
            return Err(RelayError::room_full(room.as_str(), self.max_room_members));
        }
        let _ = members.insert(handle.id().clone(), handle);

        // Counters are updated under the entry lock.
        let _ = self.connection_count.fetch_add(1, Ordering::Relaxed);
        if members.len() == 1 {
            let rooms = self.room_count.fetch_add(1, Ordering::Relaxed) + 1;
            #[allow(clippy::cast_precision_loss)]
            gauge!(ROOMS_ACTIVE).set(rooms as f64);
            debug!(%room, "room created");
        }
        Ok(())
    }

    /// Remove `id` from `room`, deleting the room when it empties.
    ///
    /// Returns whether the connection was a member.
    pub fn leave(&self, room: &RoomId, id: &ConnectionId) -> bool {
        let Entry::Occupied(mut entry) = self.rooms.entry(room.clone()) else {
            return false;
        };
        let removed = entry.get_mut().remove(id).is_some();
        if removed {
            let _ = self.connection_count.fetch_sub(1, Ordering::Relaxed);
        }
        if entry.get().is_empty() {
            let _ = entry.remove();
            let rooms = self.room_count.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
            #[allow(clippy::cast_precision_loss)]
            gauge!(ROOMS_ACTIVE).set(rooms as f64);
            debug!(%room, "room destroyed");
        }
        removed
    }

    /// Point-in-time snapshot of a room's members.
    pub fn members(&self, room: &RoomId) -> Vec<Arc<ConnectionHandle>> {
        self.rooms
            .get(room)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    /// IDs of a room's members.
    pub fn member_ids(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `id` is currently a member of `room`.
    pub fn contains(&self, room: &RoomId, id: &ConnectionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains_key(id))
    }

    /// Number of non-empty rooms.
    pub fn room_count(&self) -> usize {
        self.room_count.load(Ordering::Relaxed)
    }

    /// Number of room memberships.
    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    /// Snapshot of the current room IDs.
    pub fn rooms(&self) -> Vec<RoomId> {
        self.rooms.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Deliver `frame` to the members of `room`.
    ///
    /// Works on a snapshot, so a member joining or leaving mid-publish either
    /// gets the frame or doesn't, and never blocks the sender. Recipients
    /// whose queue is full are handled per `policy.overflow`; evicted
    /// recipients are removed from the room before this returns.
    pub fn publish(
        &self,
        room: &RoomId,
        sender: &ConnectionId,
        frame: &Arc<str>,
        policy: FanoutPolicy,
    ) -> PublishReport {
        let mut report = PublishReport::default();

        for member in self.members(room) {
            if !policy.echo_to_sender && member.id() == sender {
                continue;
            }
            match member.send(frame.clone(), policy.overflow) {
                PushOutcome::Queued => report.delivered += 1,
                PushOutcome::DroppedOldest => {
                    report.delivered += 1;
                    report.dropped_oldest += 1;
                    counter!(SIGNAL_QUEUE_DROPS_TOTAL).increment(1);
                }
                PushOutcome::Overflow => {
                    warn!(
                        conn_id = %member.id(),
                        %room,
                        capacity = member.queue().capacity(),
                        "outbound queue full, disconnecting slow consumer"
                    );
                    let err = RelayError::slow_consumer(member.queue().capacity());
                    member.evict(CloseReason::from_error(&err));
                    let _ = self.leave(room, member.id());
                    counter!(SIGNAL_SLOW_CONSUMERS_TOTAL).increment(1);
                    report.evicted.push(member.id().clone());
                }
                PushOutcome::Closed => {}
            }
        }

        counter!(SIGNAL_DELIVERIES_TOTAL).increment(report.delivered as u64);
        report
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}
