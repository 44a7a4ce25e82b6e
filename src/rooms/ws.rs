use std::{sync::Arc, time::Duration};

use axum::{
    debug_handler,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_sessions::Session;
use tracing::{debug, warn};

use crate::{
    AppResult, AppState, auth,
    auth::Identity,
    store::{NewMessage, RoomId},
};

use super::{event::{BroadcastEvent, InboundMessage}, registry::Connection};

#[debug_handler(state = AppState)]
pub async fn room_ws(
    Path(room_id): Path<RoomId>,
    State(state): State<AppState>,
    session: Session,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let identity = auth::require(&state, &session).await?;
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    Ok(ws
        .on_upgrade(move |socket| serve(socket, state, identity, room_id))
        .into_response())
}

async fn serve(socket: WebSocket, state: AppState, identity: Identity, room_id: RoomId) {
    let (sender, receiver) = socket.split();

    let (session, outbox) = ConnectionSession::bind(state.clone(), identity, room_id);
    let connection = session.connection().clone();

    let write_task = tokio::spawn(write_loop(
        sender,
        outbox,
        connection.cancel_token(),
        state.hub.write_timeout(),
    ));

    session.run(receiver).await;
    let _ = write_task.await;
}

/// Drains a connection's outbox into its socket until either side goes away.
pub async fn write_loop<S>(
    mut sender: S,
    mut outbox: mpsc::Receiver<Arc<str>>,
    cancel: CancellationToken,
    write_timeout: Duration,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = outbox.recv() => frame,
        };
        let Some(frame) = frame else {
            break;
        };

        match tokio::time::timeout(write_timeout, sender.send(Message::Text(frame.to_string().into()))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) | Err(_) => {
                debug!("socket write failed");
                cancel.cancel();
                break;
            }
        }
    }

    let _ = sender.close().await;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Bound,
    Active,
    Closing,
    Closed,
}

/// Drives one client socket: decode, stamp, encrypt, persist, publish.
///
/// Identity resolution (the connecting step) happens in [`room_ws`] before the
/// upgrade, so a session only ever exists for an authenticated caller.
pub struct ConnectionSession {
    state: AppState,
    connection: Arc<Connection>,
    phase: SessionState,
}

impl ConnectionSession {
    pub fn bind(state: AppState, identity: Identity, room_id: RoomId) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (connection, outbox) = state.hub.open(identity, room_id);
        state.hub.bind(connection.clone());
        debug!(conn_id = %connection.id, "session bound");

        let session = ConnectionSession { state, connection, phase: SessionState::Bound };
        (session, outbox)
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn phase(&self) -> SessionState {
        self.phase
    }

    /// Reads frames until the peer leaves, a frame is bad, a message can't be
    /// stored, or the connection is cancelled. Always ends `Closed`.
    pub async fn run<R, E>(mut self, mut inbound: R) -> SessionState
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: std::fmt::Display,
    {
        self.transition(SessionState::Active);
        let cancel = self.connection.cancel_token();

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = inbound.next() => frame,
            };

            let parsed = match frame {
                Some(Ok(Message::Text(text))) => serde_json::from_str::<InboundMessage>(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => serde_json::from_slice::<InboundMessage>(&bytes),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(conn_id = %self.connection.id, error = %e, "read failed");
                    break;
                }
            };

            let message = match parsed {
                Ok(message) => message,
                Err(e) => {
                    warn!(conn_id = %self.connection.id, error = %e, "malformed frame, closing connection");
                    break;
                }
            };

            if let Err(e) = self.handle(message).await {
                warn!(conn_id = %self.connection.id, error = %e, "message not stored, closing connection");
                break;
            }
        }

        self.close()
    }

    async fn handle(&self, message: InboundMessage) -> anyhow::Result<()> {
        let room_id = self.connection.room_id;
        let identity = &self.connection.identity;
        let (content, file) = message.attachment();

        let new = NewMessage {
            room_id,
            author: identity.clone(),
            content: self.state.cipher.encrypt(&content),
            created_at: OffsetDateTime::now_utc(),
            file,
        };
        let id = self.state.store.insert(&new).await?;
        debug!(conn_id = %self.connection.id, room_id, message_id = id, "message stored");

        let event = BroadcastEvent::Message {
            id,
            room_id,
            user_id: identity.user_id,
            username: identity.username.clone(),
            content,
            created_at: new.created_at,
            file: new.file.map(|f| f.name),
        };
        self.state.hub.publish(room_id, &event).await;
        Ok(())
    }

    fn close(&mut self) -> SessionState {
        if self.phase != SessionState::Closed {
            self.transition(SessionState::Closing);
            self.state.hub.disconnect(&self.connection);
            self.transition(SessionState::Closed);
        }
        self.phase
    }

    fn transition(&mut self, next: SessionState) {
        debug!(conn_id = %self.connection.id, from = ?self.phase, to = ?next, "session state");
        self.phase = next;
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.close();
    }
}
