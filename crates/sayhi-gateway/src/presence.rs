use std::collections::HashMap;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use sayhi_types::events::GatewayEvent;

/// Where to deliver events for one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

impl ConnectionHandle {
    /// A handle with a fresh connection id, plus the receiving end the
    /// connection task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<GatewayEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                conn_id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Queue an event. Returns false if the connection task is gone.
    pub fn send(&self, event: GatewayEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// user_id -> the one connection currently authoritative for that user.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<Uuid, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last writer wins. Returns the handle that was superseded, if any.
    pub async fn register(&self, user_id: Uuid, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        self.entries.write().await.insert(user_id, handle)
    }

    /// Remove the entry only if it still belongs to `conn_id`, so a stale
    /// connection's disconnect cannot wipe a newer one.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) -> bool {
        let mut entries = self.entries.write().await;
        if entries.get(&user_id).is_some_and(|h| h.conn_id == conn_id) {
            entries.remove(&user_id);
            true
        } else {
            false
        }
    }

    pub async fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.entries.read().await.get(&user_id).cloned()
    }

    /// Snapshot of online user ids, sorted.
    pub async fn list_online(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.entries.read().await.keys().copied().collect();
        ids.sort();
        ids
    }
}
