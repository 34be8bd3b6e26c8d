//! Session registry: connections, named rooms, and fan-out.
//!
//! Every connection owns an unbounded outbound queue drained by its
//! writer task. Rooms are plain name → member-set entries created on
//! first join; joining is idempotent and joining a room nobody has seen
//! before is legal. Broadcast is fire-and-forget: the registry encodes
//! the event once and pushes it to every member's queue, excluding the
//! sender unless the caller addresses everyone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::protocol::ServerEvent;

/// Identifies one live transport session.
pub type ConnectionId = Uuid;

/// Registry statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub events_sent: u64,
    pub events_dropped: u64,
    pub active_connections: usize,
    pub active_rooms: usize,
}

/// Lock-free counters for the fan-out hot path.
struct AtomicRegistryStats {
    events_sent: AtomicU64,
    events_dropped: AtomicU64,
}

impl AtomicRegistryStats {
    fn new() -> Self {
        Self {
            events_sent: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
        }
    }
}

/// Connection and room bookkeeping shared by every component.
pub struct SessionRegistry {
    /// Outbound queues, one per live connection.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    /// Room name → current members.
    rooms: RwLock<HashMap<String, HashSet<ConnectionId>>>,
    stats: Arc<AtomicRegistryStats>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
            stats: Arc::new(AtomicRegistryStats::new()),
        }
    }

    /// Register a connection's outbound queue.
    pub async fn register(
        &self,
        conn: ConnectionId,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        self.connections.write().await.insert(conn, sender);
    }

    /// Drop a connection and every room membership it held.
    pub async fn unregister(&self, conn: &ConnectionId) {
        self.leave_all(conn).await;
        self.connections.write().await.remove(conn);
    }

    /// Subscribe a connection to a room. Idempotent; the room is created
    /// on first join.
    pub async fn join(&self, conn: ConnectionId, room: &str) {
        let mut rooms = self.rooms.write().await;
        rooms.entry(room.to_string()).or_default().insert(conn);
    }

    /// Unsubscribe a connection from one room.
    pub async fn leave(&self, conn: &ConnectionId, room: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(room) {
            members.remove(conn);
            if members.is_empty() {
                rooms.remove(room);
            }
        }
    }

    /// Unsubscribe a connection from every room it joined.
    pub async fn leave_all(&self, conn: &ConnectionId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(conn);
            !members.is_empty()
        });
    }

    /// Current members of a room (empty if the room has never been joined).
    pub async fn members(&self, room: &str) -> Vec<ConnectionId> {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Send one event to one connection. Returns `false` when the
    /// connection is gone or the event could not be encoded; the event is
    /// dropped either way.
    pub async fn send_to(&self, conn: &ConnectionId, event: &ServerEvent) -> bool {
        let encoded = match event.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode event for {conn}: {e}");
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        };
        let connections = self.connections.read().await;
        match connections.get(conn) {
            Some(sender) if sender.send(Message::Text(encoded.into())).is_ok() => {
                self.stats.events_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            _ => {
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Fan an event out to a room, excluding `except` when given.
    ///
    /// The event is encoded once. Delivery is fire-and-forget: closed
    /// queues are skipped, nobody is awaited. Returns the number of
    /// members the event was queued for; a room with no other members
    /// simply drops the event.
    pub async fn broadcast(
        &self,
        room: &str,
        event: &ServerEvent,
        except: Option<&ConnectionId>,
    ) -> usize {
        let encoded = match event.encode() {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to encode broadcast for room {room}: {e}");
                self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let members = self.members(room).await;
        let connections = self.connections.read().await;
        let mut delivered = 0;
        for member in &members {
            if Some(member) == except {
                continue;
            }
            if let Some(sender) = connections.get(member) {
                if sender.send(Message::Text(encoded.clone().into())).is_ok() {
                    delivered += 1;
                    continue;
                }
            }
            self.stats.events_dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .events_sent
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Stats snapshot (counters read lock-free).
    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            events_sent: self.stats.events_sent.load(Ordering::Relaxed),
            events_dropped: self.stats.events_dropped.load(Ordering::Relaxed),
            active_connections: self.connection_count().await,
            active_rooms: self.room_count().await,
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn connect(
        registry: &SessionRegistry,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn, tx).await;
        (conn, rx)
    }

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let registry = SessionRegistry::new();
        let (conn, _rx) = connect(&registry).await;

        registry.join(conn, "doc-1").await;
        registry.join(conn, "doc-1").await;

        assert_eq!(registry.members("doc-1").await.len(), 1);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = connect(&registry).await;
        let (b, mut rx_b) = connect(&registry).await;
        registry.join(a, "doc-1").await;
        registry.join(b, "doc-1").await;

        let event = ServerEvent::ReceiveDocumentChanges(json!({"ops": []}));
        let delivered = registry.broadcast("doc-1", &event, Some(&a)).await;

        assert_eq!(delivered, 1);
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_room_drops() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = connect(&registry).await;
        registry.join(a, "doc-1").await;

        // Only the sender is present — nobody receives anything.
        let event = ServerEvent::DeleteCursor("a".to_string());
        let delivered = registry.broadcast("doc-1", &event, Some(&a)).await;

        assert_eq!(delivered, 0);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_point_to_point() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = connect(&registry).await;
        let (_b, mut rx_b) = connect(&registry).await;

        let event = ServerEvent::SaveDocumentComplete;
        assert!(registry.send_to(&a, &event).await);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection() {
        let registry = SessionRegistry::new();
        let unknown = Uuid::new_v4();
        assert!(!registry.send_to(&unknown, &ServerEvent::SaveDocumentComplete).await);
        assert_eq!(registry.stats().await.events_dropped, 1);
    }

    #[tokio::test]
    async fn test_leave_all_on_disconnect() {
        let registry = SessionRegistry::new();
        let (a, _rx) = connect(&registry).await;
        registry.join(a, "doc-1").await;
        registry.join(a, "project:p1").await;

        registry.unregister(&a).await;

        assert_eq!(registry.room_count().await, 0);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = connect(&registry).await;
        let (b, mut rx_b) = connect(&registry).await;
        registry.join(a, "doc-1").await;
        registry.join(b, "doc-2").await;

        let event = ServerEvent::ReceiveDocumentChanges(json!({"ops": []}));
        registry.broadcast("doc-1", &event, None).await;

        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stats_counts() {
        let registry = SessionRegistry::new();
        let (a, _rx_a) = connect(&registry).await;
        let (b, _rx_b) = connect(&registry).await;
        registry.join(a, "doc-1").await;
        registry.join(b, "doc-1").await;

        registry.broadcast("doc-1", &ServerEvent::SaveDocumentComplete, None).await;

        let stats = registry.stats().await;
        assert_eq!(stats.events_sent, 2);
        assert_eq!(stats.active_connections, 2);
        assert_eq!(stats.active_rooms, 1);
    }
}
