//! Room-based fan-out of server events to connections.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, warn};

use crate::db::DocId;
use crate::ws::events::ServerEvent;
use crate::ws::ConnId;

/// Delivery of server events to rooms and single connections.
///
/// Events from one sender to one room are delivered in the order emitted.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn join_room(&self, conn_id: ConnId, doc_id: DocId);

    async fn leave_room(&self, conn_id: ConnId, doc_id: DocId);

    /// Send to every member of the room except `exclude`.
    async fn emit_to_room(&self, doc_id: DocId, event: &ServerEvent, exclude: Option<ConnId>);

    async fn emit_to_connection(&self, conn_id: ConnId, event: &ServerEvent);

    async fn connection_count(&self) -> usize;

    async fn room_count(&self) -> usize;
}

/// In-process transport: one outbound channel per connection.
#[derive(Default)]
pub struct LocalHub {
    connections: RwLock<HashMap<ConnId, mpsc::UnboundedSender<String>>>,
    rooms: RwLock<HashMap<DocId, HashSet<ConnId>>>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and get the stream of frames to write to it.
    pub async fn register(&self, conn_id: ConnId) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.write().await.insert(conn_id, tx);
        rx
    }

    /// Drop the connection and its memberships.
    pub async fn unregister(&self, conn_id: ConnId) {
        self.connections.write().await.remove(&conn_id);
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    pub async fn room_members(&self, doc_id: DocId) -> HashSet<ConnId> {
        self.rooms
            .read()
            .await
            .get(&doc_id)
            .cloned()
            .unwrap_or_default()
    }

    fn encode(event: &ServerEvent) -> Option<String> {
        match event.to_json() {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("Failed to encode server event: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl Transport for LocalHub {
    async fn join_room(&self, conn_id: ConnId, doc_id: DocId) {
        self.rooms
            .write()
            .await
            .entry(doc_id)
            .or_default()
            .insert(conn_id);
    }

    async fn leave_room(&self, conn_id: ConnId, doc_id: DocId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&doc_id) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&doc_id);
            }
        }
    }

    async fn emit_to_room(&self, doc_id: DocId, event: &ServerEvent, exclude: Option<ConnId>) {
        let Some(frame) = Self::encode(event) else {
            return;
        };
        let members = self.room_members(doc_id).await;
        let connections = self.connections.read().await;
        for conn_id in members {
            if Some(conn_id) == exclude {
                continue;
            }
            if let Some(tx) = connections.get(&conn_id) {
                if tx.send(frame.clone()).is_err() {
                    debug!("Connection {} closed before delivery", conn_id);
                }
            }
        }
    }

    async fn emit_to_connection(&self, conn_id: ConnId, event: &ServerEvent) {
        let Some(frame) = Self::encode(event) else {
            return;
        };
        match self.connections.read().await.get(&conn_id) {
            Some(tx) => {
                if tx.send(frame).is_err() {
                    debug!("Connection {} closed before delivery", conn_id);
                }
            }
            None => warn!("Dropping event for unknown connection {}", conn_id),
        }
    }

    async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
