// ============================
// crates/relay-lib/src/registry.rs
// ============================
//! Connection registry: owns every live session, its verified identity
//! and its room memberships.

use std::collections::HashSet;

use chatrelay_common::{Identity, RoomId, ServerEvent};
use dashmap::DashMap;
use metrics::gauge;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::metrics as keys;

/// Unique id for one live transport session.
pub type ConnectionId = Uuid;

/// Sender half used to push outbound events to a connection's writer
/// task. Cloning it is how any part of the system reaches that client.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Cheap, cloneable view of a registered connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub identity: Identity,
    pub sender: EventSender,
}

struct Connection {
    handle: ConnectionHandle,
    rooms: HashSet<RoomId>,
}

/// Owns the set of currently-connected sessions. The underlying map
/// serializes all mutation per connection id; the room-set here is the
/// connection-side half of the membership invariant, mirrored by the
/// room directory.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authenticated session under a fresh connection id.
    /// Callers must have run the credential through the auth gate first;
    /// the registry itself never sees tokens.
    pub fn insert(&self, identity: Identity, sender: EventSender) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: Uuid::new_v4(),
            identity,
            sender,
        };

        self.connections.insert(
            handle.id,
            Connection {
                handle: handle.clone(),
                rooms: HashSet::new(),
            },
        );
        gauge!(keys::CONNECTIONS_ACTIVE).increment(1.0);

        handle
    }

    /// Remove a session, returning its handle and the rooms it belonged
    /// to so the caller can emit one leave notification per room.
    /// Removing an unknown id is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<(ConnectionHandle, HashSet<RoomId>)> {
        let (_, connection) = self.connections.remove(&id)?;
        gauge!(keys::CONNECTIONS_ACTIVE).decrement(1.0);
        Some((connection.handle, connection.rooms))
    }

    pub fn lookup(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.get(&id).map(|c| c.handle.clone())
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Record a room on the connection side. `Some(true)` if newly
    /// added, `Some(false)` if already present, `None` if the
    /// connection is gone.
    pub fn track_room(&self, id: ConnectionId, room: &str) -> Option<bool> {
        self.connections
            .get_mut(&id)
            .map(|mut c| c.rooms.insert(room.to_string()))
    }

    /// Drop a room from the connection side; idempotent.
    pub fn untrack_room(&self, id: ConnectionId, room: &str) -> Option<bool> {
        self.connections.get_mut(&id).map(|mut c| c.rooms.remove(room))
    }

    pub fn is_member(&self, id: ConnectionId, room: &str) -> bool {
        self.connections
            .get(&id)
            .map(|c| c.rooms.contains(room))
            .unwrap_or(false)
    }

    /// Snapshot of the rooms a connection has joined.
    pub fn rooms_of(&self, id: ConnectionId) -> Option<HashSet<RoomId>> {
        self.connections.get(&id).map(|c| c.rooms.clone())
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
