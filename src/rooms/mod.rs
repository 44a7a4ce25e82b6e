//! Live rooms: the socket protocol, the connection registry, fan-out, and the
//! request paths that edit or delete messages and push the result to a room.

pub mod event;
pub mod hub;
pub mod msg;
pub mod registry;
pub mod room;
pub mod ws;

use axum::{Router, routing::{get, post}};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws/chat/{room_id}", get(ws::room_ws))
        .route("/api/chat/{room_id}/messages", get(room::messages))
        .route("/api/files/{message_id}", get(room::file))
        .route("/api/edit-message", post(msg::edit))
        .route("/api/delete-message", post(msg::delete))
}
