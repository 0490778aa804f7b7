// ================
// crates/common/src/lib.rs
// ================
//! Wire protocol shared between the chat relay server and its clients.
//! Events are JSON over a persistent WebSocket connection, internally
//! tagged by `event`, with camelCase payload fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Room identifier on the wire. Rooms are looked up by this stable id;
/// the display name is a secondary index kept by the persistence layer.
pub type RoomId = String;

/// Verified identity of a connected user.
///
/// Always derived server-side from the bearer token presented at
/// connection time. Client payloads never carry identity fields.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

/// Kind of message payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// Sender block attached to a relayed message. Only the display name is
/// exposed to other room members.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MessageUser {
    pub username: String,
}

/// Events accepted from a client. Valid only once the connection is
/// authenticated; anything sent before that never reaches a handler.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Join a room, creating it on first use.
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: RoomId },
    /// Send a message to a room this connection has joined.
    #[serde(rename_all = "camelCase")]
    Message {
        room_id: RoomId,
        content: String,
        message_type: MessageKind,
    },
}

/// Events pushed from the server to connected clients.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message relayed to every member of the target room.
    #[serde(rename_all = "camelCase")]
    Message {
        room_id: RoomId,
        content: String,
        message_type: MessageKind,
        user: MessageUser,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined { room_id: RoomId, username: String },
    #[serde(rename_all = "camelCase")]
    UserLeft { room_id: RoomId, username: String },
    /// Rejection of a single event, reported to the originating
    /// connection only.
    Error { code: ErrorCode, message: String },
}

/// Wire error codes reported in [`ServerEvent::Error`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    NotMember,
    InvalidPayload,
    RoomUnknown,
}
