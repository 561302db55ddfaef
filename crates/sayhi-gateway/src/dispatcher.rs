use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use sayhi_types::events::GatewayEvent;

use crate::presence::{ConnectionHandle, PresenceRegistry};

/// Routes events to connected clients: roster broadcasts to everyone,
/// everything else point-to-point through the presence registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for roster events; every connected client receives them
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    presence: PresenceRegistry,

    /// Serializes presence changes with their roster broadcast, so the last
    /// roster sent always matches the registry.
    roster_lock: Mutex<()>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: PresenceRegistry::new(),
                roster_lock: Mutex::new(()),
            }),
        }
    }

    /// Subscribe to gateway events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: GatewayEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Make a new connection the authoritative one for `user_id` and
    /// broadcast the roster. A superseded connection is told so and its
    /// channel dropped, which ends its event loop.
    pub async fn connect(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (handle, rx) = ConnectionHandle::new();
        let conn_id = handle.conn_id();

        let _guard = self.inner.roster_lock.lock().await;
        if let Some(previous) = self.inner.presence.register(user_id, handle).await {
            info!("User {} reconnected, evicting connection {}", user_id, previous.conn_id());
            previous.send(GatewayEvent::SessionReplaced);
        }
        self.broadcast_roster().await;

        (conn_id, rx)
    }

    /// Remove the user's entry if `conn_id` still owns it and broadcast the
    /// roster. Returns false when a newer connection has taken over, in
    /// which case nothing changes.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let _guard = self.inner.roster_lock.lock().await;
        if !self.inner.presence.unregister(user_id, conn_id).await {
            return false;
        }
        self.broadcast_roster().await;
        true
    }

    /// Send a targeted event to a specific user. Returns whether a live
    /// connection accepted it; an offline user is not an error.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> bool {
        match self.inner.presence.lookup(user_id).await {
            Some(handle) => handle.send(event),
            None => {
                debug!("User {} offline, dropping event", user_id);
                false
            }
        }
    }

    async fn broadcast_roster(&self) {
        let user_ids = self.inner.presence.list_online().await;
        self.broadcast(GatewayEvent::GetOnlineUsers { user_ids });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(event: GatewayEvent) -> Vec<Uuid> {
        match event {
            GatewayEvent::GetOnlineUsers { user_ids } => user_ids,
            other => panic!("expected roster, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn roster_broadcast_on_connect_and_disconnect() {
        let dispatcher = Dispatcher::new();
        let mut events = dispatcher.subscribe();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        let (conn_a, _rx_a) = dispatcher.connect(a).await;
        assert_eq!(roster(events.recv().await.unwrap()), vec![a]);

        let (_conn_b, _rx_b) = dispatcher.connect(b).await;
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(roster(events.recv().await.unwrap()), expected);

        assert!(dispatcher.disconnect(a, conn_a).await);
        assert_eq!(roster(events.recv().await.unwrap()), vec![b]);
        assert!(dispatcher.inner.presence.lookup(a).await.is_none());
    }

    #[tokio::test]
    async fn targeted_events_reach_only_the_receiver() {
        let dispatcher = Dispatcher::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (_ca, mut rx_a) = dispatcher.connect(a).await;
        let (_cb, mut rx_b) = dispatcher.connect(b).await;

        assert!(dispatcher.send_to_user(b, GatewayEvent::UserTyping { sender_id: a }).await);

        match rx_b.recv().await.unwrap() {
            GatewayEvent::UserTyping { sender_id } => assert_eq!(sender_id, a),
            other => panic!("unexpected {:?}", other),
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_user_drops_event() {
        let dispatcher = Dispatcher::new();
        let delivered = dispatcher
            .send_to_user(Uuid::new_v4(), GatewayEvent::UserStoppedTyping { sender_id: Uuid::new_v4() })
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn reconnect_evicts_previous_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (old_conn, mut old_rx) = dispatcher.connect(user).await;
        let (new_conn, mut new_rx) = dispatcher.connect(user).await;

        assert!(matches!(old_rx.recv().await, Some(GatewayEvent::SessionReplaced)));
        assert!(old_rx.recv().await.is_none());

        // The stale connection's cleanup must not take the user offline
        assert!(!dispatcher.disconnect(user, old_conn).await);
        assert!(dispatcher.inner.presence.lookup(user).await.is_some());

        dispatcher.send_to_user(user, GatewayEvent::UserTyping { sender_id: Uuid::nil() }).await;
        assert!(matches!(new_rx.recv().await, Some(GatewayEvent::UserTyping { .. })));

        assert!(dispatcher.disconnect(user, new_conn).await);
        assert!(dispatcher.inner.presence.list_online().await.is_empty());
    }
}
