use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{auth::Identity, store::RoomId};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection is closed")]
    Closed,
    #[error("write timed out")]
    Timeout,
}

/// One live client socket bound to a room.
///
/// Frames are queued on `outbox` and drained into the socket by the
/// connection's writer task. Cancelling `cancel` shuts both halves down.
#[derive(Debug)]
pub struct Connection {
    pub id: Uuid,
    pub identity: Identity,
    pub room_id: RoomId,
    outbox: mpsc::Sender<Arc<str>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Connection {
    pub fn new(identity: Identity, room_id: RoomId, outbox: mpsc::Sender<Arc<str>>, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::now_v7(),
            identity,
            room_id,
            outbox,
            cancel,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn deliver(&self, frame: Arc<str>, timeout: Duration) -> Result<(), DeliveryError> {
        if self.cancel.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        self.outbox.send_timeout(frame, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => DeliveryError::Timeout,
            SendTimeoutError::Closed(_) => DeliveryError::Closed,
        })
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// True exactly once, for whichever caller closes the connection first.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

/// Live connections grouped by room.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    rooms: RwLock<HashMap<RoomId, HashMap<Uuid, Arc<Connection>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, connection: Arc<Connection>) {
        self.rooms
            .write()
            .entry(connection.room_id)
            .or_default()
            .insert(connection.id, connection);
    }

    /// Removing a connection that is not registered is a no-op.
    pub fn unbind(&self, connection: &Connection) -> bool {
        let mut rooms = self.rooms.write();
        let Some(members) = rooms.get_mut(&connection.room_id) else {
            return false;
        };
        let removed = members.remove(&connection.id).is_some();
        if members.is_empty() {
            rooms.remove(&connection.room_id);
        }
        removed
    }

    pub fn list_by_room(&self, room_id: RoomId) -> Vec<Arc<Connection>> {
        self.rooms
            .read()
            .get(&room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self) -> usize {
        self.rooms.read().values().map(HashMap::len).sum()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}
