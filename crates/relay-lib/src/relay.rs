// ============================
// crates/relay-lib/src/relay.rs
// ============================
//! Message relay: ties the auth gate, connection registry and room
//! directory together and defines the event protocol semantics.
//!
//! Per-connection lifecycle: `Connecting -> Authenticated ->
//! (JoinedRoom)* -> Disconnected`. Admission runs the gate; events are
//! handled strictly in receipt order by the connection's actor; a
//! disconnect at any point tears down every membership exactly once.

use std::sync::Arc;

use chatrelay_common::{ClientEvent, MessageKind, MessageUser, ServerEvent};
use chrono::Utc;
use metrics::counter;

use crate::auth::AuthGate;
use crate::bridge::{PersistenceBridge, StoredMessage};
use crate::config::Settings;
use crate::error::RelayError;
use crate::metrics as keys;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, EventSender};
use crate::rooms::RoomDirectory;
use crate::validation;

/// The shared mutable halves of the relay. Cloneable so that delivery
/// failures can schedule a member's cleanup on a separate task.
#[derive(Clone)]
struct Core {
    registry: Arc<ConnectionRegistry>,
    rooms: Arc<RoomDirectory>,
}

impl Core {
    /// Fan one event out to a member snapshot. Delivery to each member
    /// is a non-blocking channel send; a failed send means the member's
    /// writer task is gone, and its cleanup is scheduled on its own
    /// task, never inline while iterating the snapshot.
    fn broadcast(&self, members: &[ConnectionId], event: &ServerEvent) {
        for &member in members {
            let Some(handle) = self.registry.lookup(member) else {
                // Already removed between snapshot and delivery; skip.
                continue;
            };

            if handle.sender.send(event.clone()).is_err() {
                tracing::debug!(connection_id = %member, "dead member during broadcast");
                let core = self.clone();
                tokio::spawn(async move {
                    core.disconnect(member);
                });
            }
        }
        counter!(keys::BROADCAST_FANOUT).increment(members.len() as u64);
    }

    /// Tear down a connection: drop the registry record, then leave
    /// every room it belonged to with exactly one `userLeft` broadcast
    /// to the remaining members. Idempotent.
    fn disconnect(&self, id: ConnectionId) {
        let Some((handle, joined)) = self.registry.remove(id) else {
            return;
        };

        for room in joined {
            self.rooms.leave(&room, id);
            let remaining = self.rooms.members(&room);
            self.broadcast(
                &remaining,
                &ServerEvent::UserLeft {
                    room_id: room.clone(),
                    username: handle.identity.username.clone(),
                },
            );
        }

        tracing::info!(
            connection_id = %id,
            user_id = %handle.identity.user_id,
            "connection closed"
        );
    }
}

/// The relay orchestrator. Owns no protocol state of its own beyond
/// wiring gate, registry, directory and bridge together.
pub struct ChatRelay {
    gate: Arc<dyn AuthGate>,
    bridge: Arc<dyn PersistenceBridge>,
    core: Core,
    max_content_len: usize,
}

impl ChatRelay {
    pub fn new(
        gate: Arc<dyn AuthGate>,
        bridge: Arc<dyn PersistenceBridge>,
        settings: &Settings,
    ) -> Self {
        Self {
            gate,
            bridge,
            core: Core {
                registry: Arc::new(ConnectionRegistry::new()),
                rooms: Arc::new(RoomDirectory::new()),
            },
            max_content_len: settings.relay.max_content_len,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.core.registry
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.core.rooms
    }

    pub fn bridge(&self) -> &Arc<dyn PersistenceBridge> {
        &self.bridge
    }

    /// Admit a new transport session. The token is run through the auth
    /// gate; on failure the session is rejected and no connection
    /// record is created.
    pub async fn admit(
        &self,
        token: Option<&str>,
        sender: EventSender,
    ) -> Result<ConnectionHandle, RelayError> {
        let token = token.ok_or(RelayError::Unauthorized)?;
        let identity = self.gate.verify(token).await?;

        // Durable user record; best-effort like every bridge write.
        if let Err(err) = self.bridge.find_or_create_user(&identity.username).await {
            tracing::warn!(error = %err, "user record write failed");
        }

        let handle = self.core.registry.insert(identity, sender);
        counter!(keys::CONNECTIONS_ADMITTED).increment(1);
        tracing::info!(
            connection_id = %handle.id,
            user_id = %handle.identity.user_id,
            username = %handle.identity.username,
            "connection admitted"
        );

        Ok(handle)
    }

    /// Handle one inbound event from an admitted connection. Rejections
    /// are reported back to that connection only; nothing here aborts
    /// other connections or the relay itself.
    pub async fn handle_event(&self, id: ConnectionId, event: ClientEvent) {
        let result = match event {
            ClientEvent::JoinRoom { room_id } => self.join_room(id, &room_id).await,
            ClientEvent::Message {
                room_id,
                content,
                message_type,
            } => self.send_message(id, &room_id, &content, message_type).await,
        };

        if let Err(err) = result {
            counter!(keys::EVENTS_REJECTED).increment(1);
            self.report(id, &err);
        }
    }

    /// Join a room, creating it on first use. Joining a room twice is a
    /// no-op with no second `userJoined` broadcast.
    pub async fn join_room(&self, id: ConnectionId, room_id: &str) -> Result<(), RelayError> {
        let room_id = validation::validate_room_id(room_id)?;
        let handle = self
            .core
            .registry
            .lookup(id)
            .ok_or(RelayError::Unauthorized)?;

        // Durable room record, best-effort.
        if let Err(err) = self.bridge.get_or_create_room(room_id).await {
            tracing::warn!(room = room_id, error = %err, "room record write failed");
        }

        // Connection side first, then the room side (fixed order).
        match self.core.registry.track_room(id, room_id) {
            Some(true) => {},
            // Already a member, or the connection vanished mid-event.
            Some(false) | None => return Ok(()),
        }

        let (members, _) = self.core.rooms.join(room_id, id);

        // The connection may have been torn down between the two
        // inserts; its membership must not outlive it.
        if !self.core.registry.contains(id) {
            self.core.rooms.leave(room_id, id);
            return Ok(());
        }

        counter!(keys::ROOM_JOINS).increment(1);
        tracing::debug!(
            connection_id = %id,
            room = room_id,
            members = members.len(),
            "joined room"
        );

        self.core.broadcast(
            &members,
            &ServerEvent::UserJoined {
                room_id: room_id.to_string(),
                username: handle.identity.username.clone(),
            },
        );

        Ok(())
    }

    /// Relay a message to every member of a room the connection has
    /// joined. The sender identity is always the connection's verified
    /// one; nothing in the payload can override it.
    pub async fn send_message(
        &self,
        id: ConnectionId,
        room_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<(), RelayError> {
        let room_id = validation::validate_room_id(room_id)?;
        let handle = self
            .core
            .registry
            .lookup(id)
            .ok_or(RelayError::Unauthorized)?;
        let content = validation::validate_content(content, self.max_content_len)?;

        if !self.core.registry.is_member(id, room_id) {
            return Err(RelayError::NotMember(room_id.to_string()));
        }

        let timestamp = Utc::now();
        let stored = StoredMessage {
            room_id: room_id.to_string(),
            user_id: handle.identity.user_id.clone(),
            username: handle.identity.username.clone(),
            content: content.to_string(),
            kind,
            created_at: timestamp,
        };
        // Durability is best-effort; the relay still fans out when the
        // bridge is down.
        if let Err(err) = self.bridge.create_message(&stored).await {
            tracing::warn!(room = room_id, error = %err, "message persist failed");
        }

        let members = self.core.rooms.members(room_id);
        self.core.broadcast(
            &members,
            &ServerEvent::Message {
                room_id: room_id.to_string(),
                content: content.to_string(),
                message_type: kind,
                user: MessageUser {
                    username: handle.identity.username.clone(),
                },
                timestamp,
            },
        );
        counter!(keys::MESSAGES_RELAYED).increment(1);

        Ok(())
    }

    /// Tear down a connection. Safe to call at any point, any number of
    /// times.
    pub fn disconnect(&self, id: ConnectionId) {
        self.core.disconnect(id);
    }

    /// Report a per-event rejection to the originating connection only.
    fn report(&self, id: ConnectionId, err: &RelayError) {
        let Some(event) = err.to_event() else {
            tracing::error!(connection_id = %id, error = %err, "event failed");
            return;
        };

        tracing::debug!(connection_id = %id, error = %err, "event rejected");
        if let Some(handle) = self.core.registry.lookup(id) {
            // A dead sender here means the actor is already winding
            // down; its own cleanup path takes over.
            let _ = handle.sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{issue_token, JwtGate};
    use crate::bridge::FlatFileBridge;
    use chatrelay_common::Identity;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    const SECRET: &str = "test-secret";

    fn setup() -> (Arc<ChatRelay>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let bridge = Arc::new(FlatFileBridge::new(temp_dir.path()).unwrap());
        let gate = Arc::new(JwtGate::new(SECRET.to_string()));
        let settings = Settings::default();
        let relay = Arc::new(ChatRelay::new(gate, bridge, &settings));
        (relay, temp_dir)
    }

    fn identity(name: &str) -> Identity {
        Identity {
            user_id: format!("id-{name}"),
            username: name.to_string(),
        }
    }

    /// Register a connection directly, skipping the token dance.
    fn connect(
        relay: &ChatRelay,
        name: &str,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = relay.registry().insert(identity(name), tx);
        (handle, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn message_count(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::Message { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_admit_with_valid_token() {
        let (relay, _temp_dir) = setup();
        let token = issue_token(SECRET, &identity("alice"), 3600).unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let handle = relay.admit(Some(&token), tx).await.unwrap();
        assert_eq!(handle.identity.username, "alice");
        assert_eq!(relay.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_admission_leaves_no_records() {
        let (relay, _temp_dir) = setup();

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = relay.admit(None, tx).await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized));

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = relay.admit(Some("garbage"), tx).await.unwrap_err();
        assert!(matches!(err, RelayError::Unauthorized));

        assert!(relay.registry().is_empty());
        assert_eq!(relay.rooms().room_count(), 0);
    }

    #[tokio::test]
    async fn test_full_room_scenario() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");
        let (b, mut b_rx) = connect(&relay, "bob");

        // A joins "general".
        relay.join_room(a.id, "general").await.unwrap();
        assert_eq!(relay.rooms().members("general"), vec![a.id]);
        let events = drain(&mut a_rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::UserJoined { room_id, username }]
                if room_id == "general" && username == "alice"
        ));

        // B joins: both receive the notification.
        relay.join_room(b.id, "general").await.unwrap();
        assert_eq!(relay.rooms().member_count("general"), 2);
        for rx in [&mut a_rx, &mut b_rx] {
            let events = drain(rx);
            assert!(matches!(
                events.as_slice(),
                [ServerEvent::UserJoined { username, .. }] if username == "bob"
            ));
        }

        // A sends "hi": both receive it, with A's server-side identity.
        relay
            .send_message(a.id, "general", "hi", MessageKind::Text)
            .await
            .unwrap();
        for rx in [&mut a_rx, &mut b_rx] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            match &events[0] {
                ServerEvent::Message {
                    room_id,
                    content,
                    user,
                    ..
                } => {
                    assert_eq!(room_id, "general");
                    assert_eq!(content, "hi");
                    assert_eq!(user.username, "alice");
                },
                other => panic!("Expected Message, got {other:?}"),
            }
        }

        // B disconnects: A is notified, membership shrinks.
        relay.disconnect(b.id);
        assert_eq!(relay.rooms().members("general"), vec![a.id]);
        let events = drain(&mut a_rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::UserLeft { username, .. }] if username == "bob"
        ));
        assert!(drain(&mut b_rx).is_empty());
    }

    #[tokio::test]
    async fn test_second_join_is_noop_without_broadcast() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");

        relay.join_room(a.id, "general").await.unwrap();
        drain(&mut a_rx);

        relay.join_room(a.id, "general").await.unwrap();
        assert_eq!(relay.rooms().member_count("general"), 1);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_send_without_join_is_rejected() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");
        let (c, mut c_rx) = connect(&relay, "carol");

        relay.join_room(a.id, "general").await.unwrap();
        drain(&mut a_rx);

        // Through the event path so the rejection is reported back.
        relay
            .handle_event(
                c.id,
                ClientEvent::Message {
                    room_id: "general".to_string(),
                    content: "hey".to_string(),
                    message_type: MessageKind::Text,
                },
            )
            .await;

        let events = drain(&mut c_rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::Error { code, .. }] if *code == chatrelay_common::ErrorCode::NotMember
        ));
        // No broadcast reached the member.
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_blank_content_is_rejected_and_not_persisted() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");
        let (b, mut b_rx) = connect(&relay, "bob");

        relay.join_room(a.id, "general").await.unwrap();
        relay.join_room(b.id, "general").await.unwrap();
        drain(&mut a_rx);
        drain(&mut b_rx);

        relay
            .handle_event(
                a.id,
                ClientEvent::Message {
                    room_id: "general".to_string(),
                    content: "   ".to_string(),
                    message_type: MessageKind::Text,
                },
            )
            .await;

        let events = drain(&mut a_rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::Error { code, .. }]
                if *code == chatrelay_common::ErrorCode::InvalidPayload
        ));
        assert!(drain(&mut b_rx).is_empty());
        assert!(relay.bridge().list_messages("general").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_content_is_trimmed_before_relay() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");
        relay.join_room(a.id, "general").await.unwrap();
        drain(&mut a_rx);

        relay
            .send_message(a.id, "general", "  hi there  ", MessageKind::Text)
            .await
            .unwrap();

        let events = drain(&mut a_rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::Message { content, .. }] if content == "hi there"
        ));
    }

    #[tokio::test]
    async fn test_exactly_one_delivery_per_member() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");
        let (b, mut b_rx) = connect(&relay, "bob");
        let (c, mut c_rx) = connect(&relay, "carol");

        for id in [a.id, b.id, c.id] {
            relay.join_room(id, "general").await.unwrap();
        }
        for rx in [&mut a_rx, &mut b_rx, &mut c_rx] {
            drain(rx);
        }

        relay
            .send_message(a.id, "general", "once", MessageKind::Text)
            .await
            .unwrap();

        for rx in [&mut a_rx, &mut b_rx, &mut c_rx] {
            assert_eq!(message_count(&drain(rx)), 1);
        }
    }

    #[tokio::test]
    async fn test_disconnect_emits_one_leave_per_room() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");
        let (b, mut b_rx) = connect(&relay, "bob");

        for room in ["general", "random"] {
            relay.join_room(a.id, room).await.unwrap();
            relay.join_room(b.id, room).await.unwrap();
        }
        drain(&mut a_rx);
        drain(&mut b_rx);

        relay.disconnect(b.id);

        let events = drain(&mut a_rx);
        let mut left_rooms: Vec<String> = events
            .iter()
            .map(|e| match e {
                ServerEvent::UserLeft { room_id, username } => {
                    assert_eq!(username, "bob");
                    room_id.clone()
                },
                other => panic!("Expected UserLeft, got {other:?}"),
            })
            .collect();
        left_rooms.sort();
        assert_eq!(left_rooms, vec!["general", "random"]);

        assert_eq!(relay.rooms().members("general"), vec![a.id]);
        assert_eq!(relay.rooms().members("random"), vec![a.id]);
        assert!(relay.registry().lookup(b.id).is_none());

        // Repeat disconnect is a no-op with no extra notifications.
        relay.disconnect(b.id);
        assert!(drain(&mut a_rx).is_empty());
    }

    #[tokio::test]
    async fn test_membership_consistency_after_churn() {
        let (relay, _temp_dir) = setup();
        let (a, _a_rx) = connect(&relay, "alice");
        let (b, _b_rx) = connect(&relay, "bob");
        let (c, _c_rx) = connect(&relay, "carol");

        relay.join_room(a.id, "general").await.unwrap();
        relay.join_room(b.id, "general").await.unwrap();
        relay.join_room(b.id, "random").await.unwrap();
        relay.join_room(c.id, "random").await.unwrap();
        relay.join_room(c.id, "random").await.unwrap(); // duplicate
        relay.disconnect(b.id);

        // Directory membership must mirror each connection's room set.
        for room in ["general", "random"] {
            let directory: HashSet<ConnectionId> =
                relay.rooms().members(room).into_iter().collect();
            let registry: HashSet<ConnectionId> = [a.id, b.id, c.id]
                .into_iter()
                .filter(|&id| {
                    relay
                        .registry()
                        .rooms_of(id)
                        .map(|rooms| rooms.contains(room))
                        .unwrap_or(false)
                })
                .collect();
            assert_eq!(directory, registry, "membership diverged for {room}");
        }
    }

    #[tokio::test]
    async fn test_dead_member_is_skipped_and_reaped() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");
        let (b, b_rx) = connect(&relay, "bob");

        relay.join_room(a.id, "general").await.unwrap();
        relay.join_room(b.id, "general").await.unwrap();
        drain(&mut a_rx);

        // B's writer is gone: its receiver is dropped.
        drop(b_rx);

        relay
            .send_message(a.id, "general", "anyone there?", MessageKind::Text)
            .await
            .unwrap();

        // A's delivery is unaffected by B's failure.
        let events = drain(&mut a_rx);
        assert_eq!(message_count(&events), 1);

        // B's cleanup runs on its own task shortly after.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(relay.registry().lookup(b.id).is_none());
        assert_eq!(relay.rooms().members("general"), vec![a.id]);
        let events = drain(&mut a_rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::UserLeft { username, .. }] if username == "bob"
        ));
    }

    #[tokio::test]
    async fn test_invalid_room_id_is_rejected() {
        let (relay, _temp_dir) = setup();
        let (a, mut a_rx) = connect(&relay, "alice");

        relay
            .handle_event(
                a.id,
                ClientEvent::JoinRoom {
                    room_id: "../escape".to_string(),
                },
            )
            .await;

        let events = drain(&mut a_rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::Error { code, .. }]
                if *code == chatrelay_common::ErrorCode::InvalidPayload
        ));
        assert_eq!(relay.rooms().room_count(), 0);
    }
}
