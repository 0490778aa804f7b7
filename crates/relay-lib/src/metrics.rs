// ==============
// crates/relay-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "relay.ws.connection";
pub const CONNECTIONS_ACTIVE: &str = "relay.connections.active";
pub const CONNECTIONS_ADMITTED: &str = "relay.connections.admitted";
pub const CONNECTIONS_REJECTED: &str = "relay.connections.rejected";
pub const ROOM_JOINS: &str = "relay.room.joins";
pub const MESSAGES_RELAYED: &str = "relay.messages.relayed";
pub const EVENTS_REJECTED: &str = "relay.events.rejected";
pub const BROADCAST_FANOUT: &str = "relay.broadcast.fanout";
