//! Ephemeral presence: live cursor broadcast and the gather/scatter
//! cursor handshake.
//!
//! Presence shares the document room key but never touches the document
//! store — a presence-only join loads nothing, a document save wakes no
//! presence listener. Messages into a room with no other members are
//! dropped; there is no queueing and no backpressure.

use std::sync::Arc;
use uuid::Uuid;

use crate::protocol::{CursorPayload, ServerEvent};
use crate::registry::{ConnectionId, SessionRegistry};

pub struct PresenceChannel {
    registry: Arc<SessionRegistry>,
}

impl PresenceChannel {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Push-style cursor movement: relay to every other room member.
    pub async fn submit_cursor(&self, conn: ConnectionId, room: &str, payload: CursorPayload) {
        self.registry
            .broadcast(room, &ServerEvent::ReceiveCursorChanges(payload), Some(&conn))
            .await;
    }

    /// Gather step of the handshake: ask every other member to report its
    /// cursor back to `sender_id`.
    pub async fn request_cursors(
        &self,
        conn: ConnectionId,
        room: &str,
        sender_id: String,
        toggle_flag: bool,
    ) {
        self.registry
            .broadcast(
                room,
                &ServerEvent::SendCursor { sender_id, toggle_flag },
                Some(&conn),
            )
            .await;
    }

    /// Scatter step: route one member's cursor point-to-point to the
    /// requester. An unparseable or vanished requester id drops the reply.
    pub async fn deliver_cursor_data(
        &self,
        cursor: serde_json::Value,
        sender_id: &str,
        toggle_flag: bool,
    ) {
        let target: ConnectionId = match Uuid::parse_str(sender_id) {
            Ok(id) => id,
            Err(_) => {
                log::warn!("send-cursor-data addressed to invalid id {sender_id}; dropping");
                return;
            }
        };
        self.registry
            .send_to(&target, &ServerEvent::ReceiveCursor { cursor, toggle_flag })
            .await;
    }

    /// Broadcast a presence-removal notice so peers evict the cursor.
    /// Also emitted automatically when a connection disconnects.
    pub async fn remove_cursor(&self, conn: ConnectionId, room: &str, owner_id: String) {
        self.registry
            .broadcast(room, &ServerEvent::DeleteCursor(owner_id), Some(&conn))
            .await;
    }
}
