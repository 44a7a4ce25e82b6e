use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::store::{Attachment, MessageId, RoomId};

/// What a client sends over its room socket.
///
/// Author and room are never read from here; they come from the
/// connection's binding.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundMessage {
    #[serde(alias = "Content")]
    pub content: String,
    #[serde(default, alias = "File")]
    pub file: Option<Attachment>,
}

impl InboundMessage {
    pub fn attachment(self) -> (String, Option<Attachment>) {
        let file = self.file.filter(|f| !f.name.is_empty());
        (self.content, file)
    }
}

/// What the server pushes to every socket in a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BroadcastEvent {
    Message {
        id: MessageId,
        room_id: RoomId,
        user_id: i64,
        username: String,
        content: String,
        #[serde(with = "time::serde::rfc3339")]
        created_at: OffsetDateTime,
        /// Attachment name; the payload is served from `/api/files/{id}`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    Edit {
        id: MessageId,
        user_id: i64,
        username: String,
        content: String,
        #[serde(with = "time::serde::rfc3339")]
        created_at: OffsetDateTime,
    },
    Delete {
        id: MessageId,
    },
}

impl BroadcastEvent {
    pub fn id(&self) -> MessageId {
        match self {
            BroadcastEvent::Message { id, .. } | BroadcastEvent::Edit { id, .. } | BroadcastEvent::Delete { id } => *id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            BroadcastEvent::Message { .. } => "message",
            BroadcastEvent::Edit { .. } => "edit",
            BroadcastEvent::Delete { .. } => "delete",
        }
    }
}
