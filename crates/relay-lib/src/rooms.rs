// ============================
// crates/relay-lib/src/rooms.rs
// ============================
//! Room directory: membership bookkeeping per room.

use std::collections::HashSet;

use chatrelay_common::RoomId;
use dashmap::DashMap;

use crate::registry::ConnectionId;

/// Maps room ids to their member connection ids. Members are
/// back-references; ownership of the connection stays with the
/// registry. Rooms are created lazily on first join and retained when
/// they empty out: a room is a durable channel, not an ephemeral one.
#[derive(Default)]
pub struct RoomDirectory {
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get-or-create join. Returns the member snapshot after the join
    /// and whether the id was newly added (joining twice is a no-op).
    /// The snapshot is taken under the room's entry lock, so no
    /// concurrent mutation of the same room can tear it.
    pub fn join(&self, room: &str, id: ConnectionId) -> (Vec<ConnectionId>, bool) {
        let mut members = self.rooms.entry(room.to_string()).or_default();
        let inserted = members.insert(id);
        (members.iter().copied().collect(), inserted)
    }

    /// Idempotent removal. The room record survives even when its
    /// member set empties; see [`RoomDirectory::purge_empty`].
    pub fn leave(&self, room: &str, id: ConnectionId) -> bool {
        self.rooms
            .get_mut(room)
            .map(|mut members| members.remove(&id))
            .unwrap_or(false)
    }

    /// Member snapshot used for fan-out. Unknown rooms yield an empty
    /// set, not an error.
    pub fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, room: &str, id: ConnectionId) -> bool {
        self.rooms
            .get(room)
            .map(|members| members.contains(&id))
            .unwrap_or(false)
    }

    pub fn member_count(&self, room: &str) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Number of known rooms, empty ones included.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drop rooms with no members. Never called automatically; exposed
    /// as a maintenance hook for operators.
    pub fn purge_empty(&self) -> usize {
        let before = self.rooms.len();
        self.rooms.retain(|_, members| !members.is_empty());
        before - self.rooms.len()
    }
}
