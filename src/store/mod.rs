//! Persistence seam for chat messages.
//!
//! The core only ever hands ciphertext to a [`MessageStore`] and only ever
//! reads ciphertext back out of it.

mod sqlite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::auth::Identity;

pub use sqlite::SqliteMessageStore;

pub type RoomId = i64;
pub type MessageId = i64;

/// A file sent along with a message. `data` is the data URL the client sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(alias = "Name")]
    pub name: String,
    #[serde(alias = "Data")]
    pub data: String,
}

/// A message on its way into the store; `content` is ciphertext.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub author: Identity,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub file: Option<Attachment>,
}

/// A persisted message; `content` is ciphertext.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author: Identity,
    pub content: String,
    pub created_at: OffsetDateTime,
    pub file: Option<Attachment>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Backend(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message and returns the id the store assigned it.
    async fn insert(&self, message: &NewMessage) -> StoreResult<MessageId>;

    async fn get(&self, id: MessageId) -> StoreResult<Option<StoredMessage>>;

    /// Returns `false` if no such message exists.
    async fn update_content(&self, id: MessageId, ciphertext: &str) -> StoreResult<bool>;

    /// Returns `false` if no such message exists.
    async fn delete(&self, id: MessageId) -> StoreResult<bool>;

    async fn get_author(&self, id: MessageId) -> StoreResult<Option<Identity>>;

    /// Oldest first.
    async fn list_by_room(&self, room_id: RoomId) -> StoreResult<Vec<StoredMessage>>;
}
