//! Per-document session: bootstrap, delta fan-out, snapshot saves.
//!
//! A document room is keyed by the document id. Late joiners load the
//! current content before entering the edit stream; deltas are relayed
//! verbatim and never touch the store; snapshot saves overwrite the
//! stored content last-write-wins and run independently of the delta
//! stream.

use std::sync::Arc;

use tripsync_core::{Document, DocumentStore, StoreError};

use crate::protocol::ServerEvent;
use crate::registry::{ConnectionId, SessionRegistry};

pub struct DocumentSession {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn DocumentStore>,
}

impl DocumentSession {
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<dyn DocumentStore>) -> Self {
        Self { registry, store }
    }

    /// Open a document: find-or-create, join its room, and send the
    /// content to the requester only.
    ///
    /// A missing id is a defensive no-op (no room joined, nothing sent).
    /// Returns the room joined, if any.
    pub async fn open_document(
        &self,
        conn: ConnectionId,
        document_id: Option<String>,
    ) -> Result<Option<String>, StoreError> {
        let Some(document_id) = document_id else {
            log::debug!("get-document without a document id from {conn}; ignoring");
            return Ok(None);
        };

        let doc = self.load_or_create(&document_id).await?;
        self.registry.join(conn, &document_id).await;
        self.registry
            .send_to(&conn, &ServerEvent::LoadDocument(doc.content))
            .await;
        log::info!("Connection {conn} opened document {document_id}");
        Ok(Some(document_id))
    }

    /// Find the document, creating it with empty content if absent.
    ///
    /// Two first-opens can race to create the same id; the loser's
    /// duplicate-key failure falls back to re-fetching the now-existing
    /// document, so creation is idempotent from the caller's view.
    async fn load_or_create(&self, id: &str) -> Result<Document, StoreError> {
        if let Some(doc) = self.store.find(id).await? {
            return Ok(doc);
        }
        let fresh = Document::new(id);
        match self.store.create(fresh.clone()).await {
            Ok(()) => Ok(fresh),
            Err(StoreError::Duplicate(_)) => {
                log::debug!("Lost creation race for document {id}; re-fetching");
                Ok(self.store.find(id).await?.unwrap_or(fresh))
            }
            Err(e) => Err(e),
        }
    }

    /// Relay a delta to every other room member, in the sender's
    /// submission order. The store is not touched.
    pub async fn submit_change(
        &self,
        conn: ConnectionId,
        room: &str,
        delta: serde_json::Value,
    ) {
        self.registry
            .broadcast(room, &ServerEvent::ReceiveDocumentChanges(delta), Some(&conn))
            .await;
    }

    /// Persist a full-content snapshot, last-write-wins, and acknowledge
    /// to the saving connection only.
    pub async fn save_snapshot(
        &self,
        conn: ConnectionId,
        room: &str,
        content: serde_json::Value,
    ) -> Result<(), StoreError> {
        self.store.update_content(room, content).await?;
        self.registry
            .send_to(&conn, &ServerEvent::SaveDocumentComplete)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;
    use uuid::Uuid;

    fn setup() -> (Arc<SessionRegistry>, DocumentSession) {
        let registry = Arc::new(SessionRegistry::new());
        let store: Arc<dyn DocumentStore> = Arc::new(MemoryStore::new());
        let session = DocumentSession::new(registry.clone(), store);
        (registry, session)
    }

    async fn connect(
        registry: &SessionRegistry,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let conn = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(conn, tx).await;
        (conn, rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Message>) -> ServerEvent {
        match rx.try_recv().unwrap() {
            Message::Text(text) => ServerEvent::decode(text.as_str()).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_open_new_document_returns_empty_content() {
        let (registry, session) = setup();
        let (conn, mut rx) = connect(&registry).await;

        let room = session
            .open_document(conn, Some("p1/about/0".to_string()))
            .await
            .unwrap();

        assert_eq!(room.as_deref(), Some("p1/about/0"));
        assert_eq!(next_event(&mut rx), ServerEvent::LoadDocument(json!("")));
    }

    #[tokio::test]
    async fn test_open_without_id_is_noop() {
        let (registry, session) = setup();
        let (conn, mut rx) = connect(&registry).await;

        let room = session.open_document(conn, None).await.unwrap();

        assert!(room.is_none());
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_two_opens_same_content() {
        let (registry, session) = setup();
        let (a, mut rx_a) = connect(&registry).await;
        let (b, mut rx_b) = connect(&registry).await;

        session.open_document(a, Some("d1".to_string())).await.unwrap();
        session.open_document(b, Some("d1".to_string())).await.unwrap();

        assert_eq!(next_event(&mut rx_a), ServerEvent::LoadDocument(json!("")));
        assert_eq!(next_event(&mut rx_b), ServerEvent::LoadDocument(json!("")));
    }

    #[tokio::test]
    async fn test_save_then_open_round_trips() {
        let (registry, session) = setup();
        let (a, mut rx_a) = connect(&registry).await;
        session.open_document(a, Some("d1".to_string())).await.unwrap();
        let _ = rx_a.try_recv();

        session.save_snapshot(a, "d1", json!("hello")).await.unwrap();
        assert_eq!(next_event(&mut rx_a), ServerEvent::SaveDocumentComplete);

        let (b, mut rx_b) = connect(&registry).await;
        session.open_document(b, Some("d1".to_string())).await.unwrap();
        assert_eq!(
            next_event(&mut rx_b),
            ServerEvent::LoadDocument(json!("hello"))
        );
    }

    #[tokio::test]
    async fn test_submit_change_skips_sender() {
        let (registry, session) = setup();
        let (a, mut rx_a) = connect(&registry).await;
        let (b, mut rx_b) = connect(&registry).await;
        session.open_document(a, Some("d1".to_string())).await.unwrap();
        session.open_document(b, Some("d1".to_string())).await.unwrap();
        let _ = rx_a.try_recv();
        let _ = rx_b.try_recv();

        let delta = json!({"ops": [{"insert": "x"}]});
        session.submit_change(a, "d1", delta.clone()).await;

        assert_eq!(
            next_event(&mut rx_b),
            ServerEvent::ReceiveDocumentChanges(delta)
        );
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sender_order_preserved() {
        let (registry, session) = setup();
        let (a, _rx_a) = connect(&registry).await;
        let (b, mut rx_b) = connect(&registry).await;
        session.open_document(a, Some("d1".to_string())).await.unwrap();
        session.open_document(b, Some("d1".to_string())).await.unwrap();
        let _ = rx_b.try_recv();

        for i in 0..5 {
            session.submit_change(a, "d1", json!(i)).await;
        }
        for i in 0..5 {
            assert_eq!(
                next_event(&mut rx_b),
                ServerEvent::ReceiveDocumentChanges(json!(i))
            );
        }
    }
}
