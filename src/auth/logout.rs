use axum::{debug_handler, http::StatusCode};
use tower_sessions::Session;

use crate::AppResult;

#[debug_handler]
pub async fn logout(session: Session) -> AppResult<StatusCode> {
    if let Some(user_id) = session.get::<i64>(crate::session::USER_ID).await? {
        tracing::info!(user_id, "logged out");
    }
    session.clear().await;
    Ok(StatusCode::NO_CONTENT)
}
