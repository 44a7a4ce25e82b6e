pub mod auth;
pub mod cipher;
pub mod config;
pub mod rooms;
pub mod session;
pub mod store;

use std::sync::Arc;

use axum::{extract::FromRef, http::StatusCode, response::{IntoResponse, Response}};

use crate::{auth::AuthGate, cipher::MessageCipher, rooms::hub::RoomHub, store::MessageStore};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub cipher: Arc<MessageCipher>,
    pub store: Arc<dyn MessageStore>,
    pub hub: Arc<RoomHub>,
    pub auth: Arc<dyn AuthGate>,
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("not authenticated")]
    Unauthenticated,
    #[error("forbidden")]
    Forbidden,
    #[error("malformed input: {0}")]
    Malformed(String),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Unauthenticated => StatusCode::UNAUTHORIZED.into_response(),
            AppError::Forbidden => StatusCode::FORBIDDEN.into_response(),
            AppError::NotFound => StatusCode::NOT_FOUND.into_response(),
            AppError::Malformed(reason) => (StatusCode::BAD_REQUEST, reason).into_response(),
            AppError::Internal(err) => {
                tracing::error!(error = %err, backtrace = %err.backtrace(), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

impl From<cipher::CipherError> for AppError {
    fn from(err: cipher::CipherError) -> Self {
        use cipher::CipherError::*;
        match err {
            Malformed | Encoding(_) => Self::Malformed(err.to_string()),
            InvalidKey(_) => Self::Internal(anyhow::Error::from(err)),
        }
    }
}

macro_rules! apperr_impl {
    ($E:ty) => {
        impl From<$E> for AppError {
            fn from(err: $E) -> Self {
                Self::Internal(anyhow::Error::from(err))
            }
        }
    };
}

apperr_impl!(tower_sessions::session::Error);
apperr_impl!(store::StoreError);
