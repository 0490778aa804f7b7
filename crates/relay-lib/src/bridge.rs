// ============================
// crates/relay-lib/src/bridge.rs
// ============================
//! Persistence bridge abstraction with flat-file implementation.
//!
//! The relay treats durable storage as an external collaborator: rooms,
//! users and message history live behind this trait. Relay fan-out never
//! depends on a bridge write succeeding.

use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use chatrelay_common::{MessageKind, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs as tokio_fs, io::AsyncWriteExt, sync::Mutex};
use uuid::Uuid;

use crate::error::RelayError;

/// Durable room record. Stable id, with the name as secondary index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Durable user record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
}

/// One persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub room_id: RoomId,
    pub user_id: String,
    pub username: String,
    pub content: String,
    #[serde(rename = "messageType")]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

/// Trait for persistence backends
#[async_trait]
pub trait PersistenceBridge: Send + Sync {
    /// Return the room with this name, creating it atomically if absent.
    async fn get_or_create_room(&self, name: &str) -> Result<RoomRecord, RelayError>;

    /// Explicit lookup; `None` for unknown rooms.
    async fn find_room(&self, name: &str) -> Result<Option<RoomRecord>, RelayError>;

    /// Return the user with this name, creating it atomically if absent.
    async fn find_or_create_user(&self, username: &str) -> Result<UserRecord, RelayError>;

    /// Append one message to a room's history.
    async fn create_message(&self, message: &StoredMessage) -> Result<(), RelayError>;

    /// Full history for a room in creation order. Unknown rooms fail
    /// with [`RelayError::RoomUnknown`].
    async fn list_messages(&self, room: &str) -> Result<Vec<StoredMessage>, RelayError>;
}

/// Flat-file implementation of the PersistenceBridge trait: one
/// directory per room holding `room.json` and a JSON-lines
/// `messages.log`, plus a single `users.json` index.
///
/// Room names reach the filesystem as directory names; callers validate
/// them against the room-id alphabet before they get here.
pub struct FlatFileBridge {
    root: PathBuf,
    // Serializes get-or-create so concurrent requests cannot race a
    // duplicate record into existence.
    create_lock: Mutex<()>,
}

impl FlatFileBridge {
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("rooms"))?;
        Ok(Self {
            root,
            create_lock: Mutex::new(()),
        })
    }

    fn room_dir(&self, name: &str) -> PathBuf {
        self.root.join("rooms").join(name)
    }

    fn room_record_path(&self, name: &str) -> PathBuf {
        self.room_dir(name).join("room.json")
    }

    fn messages_path(&self, name: &str) -> PathBuf {
        self.room_dir(name).join("messages.log")
    }

    fn users_path(&self) -> PathBuf {
        self.root.join("users.json")
    }

    async fn read_room(&self, name: &str) -> Result<Option<RoomRecord>, RelayError> {
        let path = self.room_record_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let content = tokio_fs::read_to_string(&path).await?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    async fn read_users(&self) -> Result<Vec<UserRecord>, RelayError> {
        let path = self.users_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = tokio_fs::read_to_string(&path).await?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl PersistenceBridge for FlatFileBridge {
    async fn get_or_create_room(&self, name: &str) -> Result<RoomRecord, RelayError> {
        let _guard = self.create_lock.lock().await;

        if let Some(existing) = self.read_room(name).await? {
            return Ok(existing);
        }

        let record = RoomRecord {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        let path = self.room_record_path(name);
        tokio_fs::create_dir_all(path.parent().unwrap()).await?;
        tokio_fs::write(&path, serde_json::to_string_pretty(&record)?).await?;

        Ok(record)
    }

    async fn find_room(&self, name: &str) -> Result<Option<RoomRecord>, RelayError> {
        self.read_room(name).await
    }

    async fn find_or_create_user(&self, username: &str) -> Result<UserRecord, RelayError> {
        let _guard = self.create_lock.lock().await;

        let mut users = self.read_users().await?;
        if let Some(existing) = users.iter().find(|u| u.username == username) {
            return Ok(existing.clone());
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            username: username.to_string(),
        };
        users.push(record.clone());
        tokio_fs::write(self.users_path(), serde_json::to_string_pretty(&users)?).await?;

        Ok(record)
    }

    /// Append a JSON line to the room's `messages.log`.
    async fn create_message(&self, message: &StoredMessage) -> Result<(), RelayError> {
        let path = self.messages_path(&message.room_id);
        tokio_fs::create_dir_all(path.parent().unwrap()).await?;

        let mut file = tokio_fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        file.write_all(serde_json::to_string(message)?.as_bytes())
            .await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    async fn list_messages(&self, room: &str) -> Result<Vec<StoredMessage>, RelayError> {
        if self.read_room(room).await?.is_none() {
            return Err(RelayError::RoomUnknown(room.to_string()));
        }

        let path = self.messages_path(room);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let content = tokio_fs::read_to_string(&path).await?;
        let messages = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<StoredMessage>, _>>()?;

        Ok(messages)
    }
}
