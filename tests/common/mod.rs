#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::stream;
use sealedchat::{
    AppResult, AppState,
    auth::{AuthGate, Identity},
    cipher::MessageCipher,
    rooms::{
        event::BroadcastEvent,
        hub::RoomHub,
        registry::Connection,
        ws::{ConnectionSession, SessionState},
    },
    store::{MessageId, MessageStore, NewMessage, RoomId, SqliteMessageStore, StoreError, StoreResult, StoredMessage},
};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::{sync::mpsc, task::JoinHandle};
use tower_sessions::Session;

pub const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

pub struct NoAuth;

#[async_trait]
impl AuthGate for NoAuth {
    async fn resolve(&self, _session: &Session) -> AppResult<Option<Identity>> {
        Ok(None)
    }
}

/// Treats every request as coming from one fixed user.
pub struct SignedIn(pub Identity);

#[async_trait]
impl AuthGate for SignedIn {
    async fn resolve(&self, _session: &Session) -> AppResult<Option<Identity>> {
        Ok(Some(self.0.clone()))
    }
}

pub fn identity(user_id: i64, username: &str) -> Identity {
    Identity { user_id, username: username.to_owned() }
}

pub async fn sqlite_store() -> SqliteMessageStore {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = SqliteMessageStore::new(db_pool);
    store.migrate().await.unwrap();
    store
}

pub fn app_with(store: Arc<dyn MessageStore>) -> AppState {
    AppState {
        cipher: Arc::new(MessageCipher::new(KEY).unwrap()),
        store,
        hub: Arc::new(RoomHub::new(Duration::from_millis(200), 16)),
        auth: Arc::new(NoAuth),
    }
}

pub async fn app() -> AppState {
    app_with(Arc::new(sqlite_store().await))
}

/// A connection driven from the test instead of a socket.
pub struct Client {
    pub conn: Arc<Connection>,
    frames: Option<mpsc::UnboundedSender<Result<Message, axum::Error>>>,
    pub outbox: mpsc::Receiver<Arc<str>>,
    task: JoinHandle<SessionState>,
}

impl Client {
    pub fn join(state: &AppState, who: Identity, room_id: RoomId) -> Client {
        let (session, outbox) = ConnectionSession::bind(state.clone(), who, room_id);
        let conn = session.connection().clone();

        let (frames, mut rx) = mpsc::unbounded_channel();
        let inbound = stream::poll_fn(move |cx| rx.poll_recv(cx));
        let task = tokio::spawn(session.run(inbound));

        Client { conn, frames: Some(frames), outbox, task }
    }

    pub fn send_raw(&self, text: &str) {
        if let Some(frames) = &self.frames {
            let _ = frames.send(Ok(Message::Text(text.to_owned().into())));
        }
    }

    pub fn say(&self, content: &str) {
        self.send_raw(&serde_json::json!({ "content": content }).to_string());
    }

    pub async fn next_event(&mut self) -> BroadcastEvent {
        let frame = tokio::time::timeout(Duration::from_secs(2), self.outbox.recv())
            .await
            .expect("no event within 2s")
            .expect("outbox closed");
        serde_json::from_str(&frame).unwrap()
    }

    pub async fn no_event(&mut self) {
        let next = tokio::time::timeout(Duration::from_millis(100), self.outbox.recv()).await;
        assert!(next.is_err() || next.unwrap().is_none(), "unexpected event");
    }

    /// Waits for the session loop to finish on its own.
    pub async fn finished(self) -> SessionState {
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .expect("session still running")
            .unwrap()
    }

    /// Hangs up from the client side and waits for teardown.
    pub async fn hang_up(mut self) -> SessionState {
        self.frames.take();
        self.finished().await
    }
}

pub fn content_of(event: &BroadcastEvent) -> &str {
    match event {
        BroadcastEvent::Message { content, .. } | BroadcastEvent::Edit { content, .. } => content.as_str(),
        BroadcastEvent::Delete { .. } => "",
    }
}

/// A store whose backend is gone.
pub struct DownStore;

#[async_trait]
impl MessageStore for DownStore {
    async fn insert(&self, _message: &NewMessage) -> StoreResult<MessageId> {
        Err(StoreError::Backend(sqlx::Error::PoolClosed))
    }
    async fn get(&self, _id: MessageId) -> StoreResult<Option<StoredMessage>> {
        Err(StoreError::Backend(sqlx::Error::PoolClosed))
    }
    async fn update_content(&self, _id: MessageId, _ciphertext: &str) -> StoreResult<bool> {
        Err(StoreError::Backend(sqlx::Error::PoolClosed))
    }
    async fn delete(&self, _id: MessageId) -> StoreResult<bool> {
        Err(StoreError::Backend(sqlx::Error::PoolClosed))
    }
    async fn get_author(&self, _id: MessageId) -> StoreResult<Option<Identity>> {
        Err(StoreError::Backend(sqlx::Error::PoolClosed))
    }
    async fn list_by_room(&self, _room_id: RoomId) -> StoreResult<Vec<StoredMessage>> {
        Err(StoreError::Backend(sqlx::Error::PoolClosed))
    }
}
