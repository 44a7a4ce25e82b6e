mod logout;

use async_trait::async_trait;
use axum::{Router, routing::post};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{AppError, AppResult, AppState, session::{USER_ID, USERNAME}};

pub use logout::logout;

/// Who is on the other end of a request or connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: i64,
    pub username: String,
}

/// Resolves the authenticated caller from the request's cookie session.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn resolve(&self, session: &Session) -> AppResult<Option<Identity>>;
}

/// Trusts whatever the login flow wrote into the session store.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionAuthGate;

#[async_trait]
impl AuthGate for SessionAuthGate {
    async fn resolve(&self, session: &Session) -> AppResult<Option<Identity>> {
        let Some(user_id) = session.get::<i64>(USER_ID).await? else {
            return Ok(None);
        };
        let Some(username) = session.get::<String>(USERNAME).await? else {
            return Ok(None);
        };
        Ok(Some(Identity { user_id, username }))
    }
}

pub(crate) async fn require(state: &AppState, session: &Session) -> AppResult<Identity> {
    state.auth.resolve(session).await?.ok_or(AppError::Unauthenticated)
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/logout", post(logout))
}
