use anyhow::anyhow;
use axum::{
    Json, debug_handler,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use tower_sessions::Session;

use crate::{
    AppError, AppResult, AppState, auth,
    store::{Attachment, MessageId, RoomId},
};

use super::msg::MessageView;

#[debug_handler(state = AppState)]
pub async fn messages(
    Path(room_id): Path<RoomId>,
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<Vec<MessageView>>> {
    auth::require(&state, &session).await?;
    Ok(Json(room_history(&state, room_id).await?))
}

/// Every message in the room, oldest first, decrypted for display.
pub async fn room_history(state: &AppState, room_id: RoomId) -> AppResult<Vec<MessageView>> {
    Ok(state
        .store
        .list_by_room(room_id)
        .await?
        .into_iter()
        .map(|message| MessageView::decrypt(&state.cipher, message))
        .collect())
}

#[debug_handler(state = AppState)]
pub async fn file(
    Path(message_id): Path<MessageId>,
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Response> {
    auth::require(&state, &session).await?;

    let message = state.store.get(message_id).await?.ok_or(AppError::NotFound)?;
    let attachment = message.file.ok_or(AppError::NotFound)?;
    let (media_type, bytes) = decode_data_url(&attachment)?;

    Ok((
        [
            (header::CONTENT_TYPE, media_type),
            (header::CONTENT_DISPOSITION, content_disposition(&attachment.name)),
        ],
        bytes,
    )
        .into_response())
}

/// Drops characters that can't sit inside a quoted header parameter.
fn content_disposition(name: &str) -> String {
    let name: String = name.chars().filter(|c| !c.is_control() && !matches!(c, '"' | '\\')).collect();
    format!("attachment; filename=\"{name}\"")
}

/// Splits `data:<type>;base64,<payload>` into its media type and decoded bytes.
fn decode_data_url(attachment: &Attachment) -> AppResult<(String, Vec<u8>)> {
    let (header, payload) = attachment
        .data
        .split_once(',')
        .ok_or_else(|| anyhow!("attachment {:?} is not a data url", attachment.name))?;

    let media_type = header
        .strip_prefix("data:")
        .and_then(|h| h.split(';').next())
        .filter(|t| !t.is_empty())
        .unwrap_or("application/octet-stream")
        .to_owned();

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| anyhow!("attachment {:?} payload: {e}", attachment.name))?;

    Ok((media_type, bytes))
}
