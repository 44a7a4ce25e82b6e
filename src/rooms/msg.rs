use axum::{
    Json, debug_handler,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tower_sessions::Session;
use tracing::{info, warn};

use crate::{
    AppError, AppResult, AppState, auth,
    auth::Identity,
    cipher::MessageCipher,
    store::{MessageId, RoomId, StoredMessage},
};

use super::event::BroadcastEvent;

/// Shown instead of a body that no longer decrypts.
pub const UNREADABLE: &str = "[decryption failed]";

#[derive(Debug, Deserialize)]
pub struct EditMessageQuery {
    pub message_id: String,
    pub content: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteMessageQuery {
    pub message_id: String,
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// A message as clients see it: plaintext, attachment by name only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: MessageId,
    pub room_id: RoomId,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub file: Option<String>,
}

impl MessageView {
    pub fn decrypt(cipher: &MessageCipher, message: StoredMessage) -> MessageView {
        let content = match cipher.decrypt(&message.content) {
            Ok(content) => content,
            Err(e) => {
                warn!(message_id = message.id, error = %e, "stored message does not decrypt");
                UNREADABLE.to_owned()
            }
        };

        MessageView {
            id: message.id,
            room_id: message.room_id,
            user_id: message.author.user_id,
            username: message.author.username,
            content,
            created_at: message.created_at,
            file: message.file.map(|f| f.name),
        }
    }
}

pub fn parse_id(raw: &str, what: &str) -> AppResult<i64> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::Malformed(format!("invalid {what}: {raw:?}")))
}

/// The room recorded on the message wins; the requested one is only a fallback.
fn resolve_room(requested: Option<&str>, recorded: Option<RoomId>, message_id: MessageId) -> Option<RoomId> {
    let requested = requested.and_then(|raw| raw.trim().parse::<RoomId>().ok());
    match (recorded, requested) {
        (Some(recorded), Some(requested)) if recorded != requested => {
            warn!(message_id, recorded, requested, "request names a different room than the message");
            Some(recorded)
        }
        (recorded, requested) => recorded.or(requested),
    }
}

async fn authorize(state: &AppState, caller: &Identity, id: MessageId) -> AppResult<()> {
    let author = state.store.get_author(id).await?.ok_or(AppError::NotFound)?;
    if author.user_id != caller.user_id {
        warn!(message_id = id, user_id = caller.user_id, "caller is not the author");
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub async fn edit_message(state: &AppState, caller: &Identity, query: EditMessageQuery) -> AppResult<MessageView> {
    let id = parse_id(&query.message_id, "message id")?;
    authorize(state, caller, id).await?;

    let ciphertext = state.cipher.encrypt(&query.content);
    if !state.store.update_content(id, &ciphertext).await? {
        return Err(AppError::NotFound);
    }

    let stored = state.store.get(id).await?.ok_or(AppError::NotFound)?;
    let room_id = resolve_room(query.chat_id.as_deref(), Some(stored.room_id), id);
    let view = MessageView::decrypt(&state.cipher, stored);
    info!(message_id = id, user_id = caller.user_id, "message edited");

    if let Some(room_id) = room_id {
        let event = BroadcastEvent::Edit {
            id,
            user_id: view.user_id,
            username: view.username.clone(),
            content: query.content,
            created_at: view.created_at,
        };
        state.hub.publish(room_id, &event).await;
    }
    Ok(view)
}

pub async fn delete_message(state: &AppState, caller: &Identity, query: DeleteMessageQuery) -> AppResult<()> {
    let id = parse_id(&query.message_id, "message id")?;
    authorize(state, caller, id).await?;

    let recorded = match state.store.get(id).await {
        Ok(stored) => stored.map(|m| m.room_id),
        Err(e) => {
            warn!(message_id = id, error = %e, "could not read message before delete");
            None
        }
    };

    if !state.store.delete(id).await? {
        return Err(AppError::NotFound);
    }
    info!(message_id = id, user_id = caller.user_id, "message deleted");

    match resolve_room(query.chat_id.as_deref(), recorded, id) {
        Some(room_id) => {
            state.hub.publish(room_id, &BroadcastEvent::Delete { id }).await;
        }
        None => warn!(message_id = id, "no room known for deleted message, not broadcasting"),
    }
    Ok(())
}

#[debug_handler(state = AppState)]
pub async fn edit(
    State(state): State<AppState>,
    session: Session,
    query: Result<Json<EditMessageQuery>, JsonRejection>,
) -> AppResult<Json<MessageView>> {
    let caller = auth::require(&state, &session).await?;
    let Json(query) = query.map_err(|e| AppError::Malformed(e.body_text()))?;

    Ok(Json(edit_message(&state, &caller, query).await?))
}

#[debug_handler(state = AppState)]
pub async fn delete(
    State(state): State<AppState>,
    session: Session,
    query: Result<Json<DeleteMessageQuery>, JsonRejection>,
) -> AppResult<StatusCode> {
    let caller = auth::require(&state, &session).await?;
    let Json(query) = query.map_err(|e| AppError::Malformed(e.body_text()))?;

    delete_message(&state, &caller, query).await?;
    Ok(StatusCode::NO_CONTENT)
}
