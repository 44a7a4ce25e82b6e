//! Fan-out of room events to every live connection in the room.

use std::{sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{auth::Identity, store::RoomId};

use super::{
    event::BroadcastEvent,
    registry::{Connection, ConnectionRegistry},
};

pub struct RoomHub {
    registry: ConnectionRegistry,
    write_timeout: Duration,
    outbox_capacity: usize,
    shutdown: CancellationToken,
}

impl RoomHub {
    pub fn new(write_timeout: Duration, outbox_capacity: usize) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            write_timeout,
            outbox_capacity: outbox_capacity.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Creates a connection (not yet bound) plus the receiving end of its outbox.
    pub fn open(&self, identity: Identity, room_id: RoomId) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(self.outbox_capacity);
        let connection = Connection::new(identity, room_id, tx, self.shutdown.child_token());
        (Arc::new(connection), rx)
    }

    pub fn bind(&self, connection: Arc<Connection>) {
        info!(
            conn_id = %connection.id,
            room_id = connection.room_id,
            user_id = connection.identity.user_id,
            "connection bound"
        );
        self.registry.bind(connection);
    }

    /// Tears a connection down: unbinds it and cancels its socket tasks.
    /// Only the first call for a given connection does anything.
    pub fn disconnect(&self, connection: &Connection) -> bool {
        if !connection.mark_closed() {
            return false;
        }
        self.registry.unbind(connection);
        connection.cancel_token().cancel();
        info!(conn_id = %connection.id, room_id = connection.room_id, "connection closed");
        true
    }

    /// Delivers `event` to every connection currently bound to `room_id` and
    /// returns how many accepted it. Connections that fail are disconnected.
    pub async fn publish(&self, room_id: RoomId, event: &BroadcastEvent) -> usize {
        let frame: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(room_id, action = event.action(), error = %e, "failed to serialize event");
                return 0;
            }
        };

        let recipients = self.registry.list_by_room(room_id);
        let results = join_all(recipients.iter().map(|conn| {
            let frame = frame.clone();
            async move { (conn, conn.deliver(frame, self.write_timeout).await) }
        }))
        .await;

        let mut delivered = 0;
        for (conn, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(conn_id = %conn.id, room_id, error = %e, "delivery failed, dropping connection");
                    self.disconnect(conn);
                }
            }
        }

        debug!(
            room_id,
            action = event.action(),
            message_id = event.id(),
            recipients = recipients.len(),
            delivered,
            "published event"
        );
        delivered
    }

    /// Closes every live connection.
    pub fn shutdown(&self) {
        info!(connections = self.registry.connection_count(), "closing all connections");
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: i64) -> Identity {
        Identity { user_id, username: format!("user{user_id}") }
    }

    fn join(hub: &RoomHub, user_id: i64, room_id: RoomId) -> (Arc<Connection>, mpsc::Receiver<Arc<str>>) {
        let (conn, rx) = hub.open(identity(user_id), room_id);
        hub.bind(conn.clone());
        (conn, rx)
    }

    fn recv_event(rx: &mut mpsc::Receiver<Arc<str>>) -> BroadcastEvent {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn reaches_every_member_of_the_room_only() {
        let hub = RoomHub::new(Duration::from_millis(50), 8);
        let (_a, mut ra) = join(&hub, 1, 7);
        let (_b, mut rb) = join(&hub, 2, 7);
        let (_c, mut rc) = join(&hub, 3, 8);

        let delivered = hub.publish(7, &BroadcastEvent::Delete { id: 5 }).await;

        assert_eq!(delivered, 2);
        assert_eq!(recv_event(&mut ra), BroadcastEvent::Delete { id: 5 });
        assert_eq!(recv_event(&mut rb), BroadcastEvent::Delete { id: 5 });
        assert!(rc.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_room_is_fine() {
        let hub = RoomHub::new(Duration::from_millis(50), 8);
        assert_eq!(hub.publish(1, &BroadcastEvent::Delete { id: 1 }).await, 0);
    }

    #[tokio::test]
    async fn failed_member_is_dropped_and_others_still_receive() {
        let hub = RoomHub::new(Duration::from_millis(50), 8);
        let (_a, mut ra) = join(&hub, 1, 7);
        let (b, rb) = join(&hub, 2, 7);
        let (_c, mut rc) = join(&hub, 3, 7);
        drop(rb);

        let delivered = hub.publish(7, &BroadcastEvent::Delete { id: 9 }).await;

        assert_eq!(delivered, 2);
        assert_eq!(recv_event(&mut ra), BroadcastEvent::Delete { id: 9 });
        assert_eq!(recv_event(&mut rc), BroadcastEvent::Delete { id: 9 });
        assert!(hub.registry().list_by_room(7).iter().all(|c| c.id != b.id));
        assert!(b.is_closed());
        assert!(b.cancel_token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_member_times_out_without_blocking_others() {
        let hub = RoomHub::new(Duration::from_secs(2), 1);
        let (_a, mut ra) = join(&hub, 1, 7);
        let (slow, _rs) = join(&hub, 2, 7);

        // Fill the slow member's outbox so the next write has to wait.
        assert_eq!(hub.publish(7, &BroadcastEvent::Delete { id: 1 }).await, 2);
        assert_eq!(recv_event(&mut ra), BroadcastEvent::Delete { id: 1 });

        assert_eq!(hub.publish(7, &BroadcastEvent::Delete { id: 2 }).await, 1);
        assert_eq!(recv_event(&mut ra), BroadcastEvent::Delete { id: 2 });
        assert!(slow.is_closed());
        assert_eq!(hub.registry().list_by_room(7).len(), 1);
    }

    #[tokio::test]
    async fn disconnect_runs_once() {
        let hub = RoomHub::new(Duration::from_millis(50), 8);
        let (a, _ra) = join(&hub, 1, 7);
        assert!(hub.disconnect(&a));
        assert!(!hub.disconnect(&a));
        assert!(hub.registry().list_by_room(7).is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_every_connection() {
        let hub = RoomHub::new(Duration::from_millis(50), 8);
        let (a, _ra) = join(&hub, 1, 7);
        let (b, _rb) = join(&hub, 2, 8);
        hub.shutdown();
        assert!(a.cancel_token().is_cancelled());
        assert!(b.cancel_token().is_cancelled());
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let hub = RoomHub::new(Duration::from_millis(50), 8);
        let (_a, mut ra) = join(&hub, 1, 7);
        for id in 1..=5 {
            hub.publish(7, &BroadcastEvent::Delete { id }).await;
        }
        let ids: Vec<_> = (0..5).map(|_| recv_event(&mut ra).id()).collect();
        assert_eq!(ids, [1, 2, 3, 4, 5]);
    }
}
