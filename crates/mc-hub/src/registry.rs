use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use mc_core::{EventKind, SubscriptionFilter};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

/// Close code used when the registry is at capacity.
pub const CAPACITY_CLOSE_CODE: u16 = 1013;
pub const CAPACITY_CLOSE_REASON: &str = "server capacity reached";

/// One live transport-level link from a dashboard to the hub.
///
/// The hub owns the connection exclusively; the writer half of the socket
/// drains the `sender` channel, so dropping the last `Arc<Connection>` after
/// deregistration is what closes the transport.
pub struct Connection {
    pub id: String,
    pub remote: SocketAddr,
    pub user_agent: Option<String>,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Message>,
    last_seen: AsyncMutex<Instant>,
    filter: AsyncMutex<SubscriptionFilter>,
    terminated: Notify,
}

impl Connection {
    pub fn new(
        id: String,
        remote: SocketAddr,
        user_agent: Option<String>,
        sender: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            id,
            remote,
            user_agent,
            connected_at: Utc::now(),
            sender,
            last_seen: AsyncMutex::new(Instant::now()),
            filter: AsyncMutex::new(SubscriptionFilter::default()),
            terminated: Notify::new(),
        }
    }

    /// Order the socket task to drop the transport without waiting for the
    /// peer to finish a close handshake. A dead peer never completes one.
    pub fn terminate(&self) {
        self.terminated.notify_one();
    }

    /// Resolves once [`Connection::terminate`] has been called, even when the
    /// call happened before anyone was waiting.
    pub async fn wait_terminated(&self) {
        self.terminated.notified().await;
    }

    /// Refresh the liveness timestamp; called for every inbound frame.
    pub async fn touch(&self) {
        let mut last = self.last_seen.lock().await;
        *last = Instant::now();
    }

    pub async fn last_seen(&self) -> Instant {
        *self.last_seen.lock().await
    }

    pub async fn matches(&self, kind: &EventKind) -> bool {
        self.filter.lock().await.matches(kind)
    }

    /// Add entries to the filter and return the resulting full set.
    pub async fn subscribe(&self, events: Vec<String>) -> Vec<String> {
        let mut filter = self.filter.lock().await;
        filter.subscribe(events);
        filter.entries()
    }

    pub async fn unsubscribe(&self, events: &[String]) {
        let mut filter = self.filter.lock().await;
        filter.unsubscribe(events.iter().map(String::as_str));
    }

    pub async fn send_text(&self, text: String) -> bool {
        self.sender.send(Message::Text(text)).await.is_ok()
    }

    pub async fn send_close(&self, code: u16, reason: &'static str) {
        let _ = self
            .sender
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }
}

/// Collision-resistant within the process lifetime; not a security token.
pub fn next_connection_id() -> String {
    let millis = Utc::now().timestamp_millis();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("ws-{millis:x}-{}", &suffix[..8])
}

/// Bounded set of live connections keyed by id.
///
/// Fan-out iterates a snapshot, so a connection removed mid-broadcast is
/// simply skipped when its channel send fails.
pub struct ConnectionRegistry {
    capacity: usize,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns false when at capacity; the caller rejects the transport.
    pub async fn add(&self, conn: Arc<Connection>) -> bool {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.capacity {
            return false;
        }
        connections.insert(conn.id.clone(), conn);
        true
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> Arc<Connection> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(Connection::new(
            id.to_string(),
            "127.0.0.1:9".parse().expect("addr"),
            None,
            tx,
        ))
    }

    #[tokio::test]
    async fn add_get_remove() {
        let registry = ConnectionRegistry::new(4);
        registry.add(conn("a")).await;
        assert!(registry.get("a").await.is_some());
        assert_eq!(registry.len().await, 1);
        assert!(registry.remove("a").await.is_some());
        assert!(registry.get("a").await.is_none());
        assert!(registry.remove("a").await.is_none());
    }

    #[tokio::test]
    async fn rejects_when_full() {
        let registry = ConnectionRegistry::new(1);
        assert!(registry.add(conn("a")).await);
        assert!(!registry.add(conn("b")).await);
        registry.remove("a").await;
        assert!(registry.add(conn("b")).await);
    }

    #[tokio::test]
    async fn terminate_wakes_a_waiter_that_starts_later() {
        let connection = conn("a");
        connection.terminate();
        // the permit is stored, so the wait completes immediately
        tokio::time::timeout(std::time::Duration::from_secs(1), connection.wait_terminated())
            .await
            .expect("terminated");
    }

    #[test]
    fn connection_ids_do_not_collide() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(next_connection_id()));
        }
    }
}
