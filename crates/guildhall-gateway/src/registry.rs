use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, trace};
use uuid::Uuid;

use guildhall_types::events::GatewayEvent;

/// Best-effort push to a user's live sessions. At most once per call, never
/// blocks, and silently drops when the user has no open channel.
#[async_trait]
pub trait PushDelivery: Send + Sync {
    async fn deliver(&self, user_id: Uuid, event: GatewayEvent);

    async fn deliver_cancellation(&self, user_id: Uuid, notification_id: Uuid) {
        self.deliver(user_id, GatewayEvent::NotificationCancel { notification_id })
            .await;
    }
}

struct Session {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<GatewayEvent>,
}

/// Live-session registry: user id -> open connections (one per device).
/// Lives for the whole process and is never persisted.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: RwLock<HashMap<Uuid, Vec<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection for `user_id`. Returns (conn_id, receiver).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .sessions
            .write()
            .await
            .entry(user_id)
            .or_default()
            .push(Session { conn_id, tx });
        debug!("Session {} registered for {}", conn_id, user_id);
        (conn_id, rx)
    }

    /// Drop one connection; other devices of the same user stay registered.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        let mut sessions = self.inner.sessions.write().await;
        if let Some(conns) = sessions.get_mut(&user_id) {
            conns.retain(|s| s.conn_id != conn_id);
            if conns.is_empty() {
                sessions.remove(&user_id);
            }
        }
        debug!("Session {} unregistered for {}", conn_id, user_id);
    }

    /// Send `event` to every open connection of `user_id`. Returns how many
    /// connections accepted it.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) -> usize {
        let sessions = self.inner.sessions.read().await;
        let Some(conns) = sessions.get(&user_id) else {
            trace!("No live session for {}, dropping push", user_id);
            return 0;
        };

        conns
            .iter()
            .filter(|s| s.tx.send(event.clone()).is_ok())
            .count()
    }

    pub async fn is_connected(&self, user_id: Uuid) -> bool {
        self.inner.sessions.read().await.contains_key(&user_id)
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .sessions
            .read()
            .await
            .get(&user_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl PushDelivery for SessionRegistry {
    async fn deliver(&self, user_id: Uuid, event: GatewayEvent) {
        self.send_to_user(user_id, event).await;
    }
}
