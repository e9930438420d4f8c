use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use crate::db::DocId;
use crate::kv::{keys, SharedKvStore, StoreError};

const UNKNOWN_USER: &str = "Unknown";

/// Cursor state as stored. The position fields are opaque (`x`/`y` pixels,
/// a text `index`, a selection range, ...) and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorData {
    pub username: String,
    #[serde(default)]
    pub is_typing: bool,
    #[serde(flatten)]
    pub position: Map<String, Value>,
}

/// Per-document cursor map with a rolling TTL
#[derive(Clone)]
pub struct CursorTracker {
    store: SharedKvStore,
    ttl: Duration,
}

impl CursorTracker {
    pub fn new(store: SharedKvStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn set_cursor(
        &self,
        doc_id: DocId,
        conn_id: &str,
        cursor: &CursorData,
    ) -> Result<(), StoreError> {
        let key = keys::cursors(doc_id);
        self.store
            .hset(&key, conn_id, serde_json::to_string(cursor)?)
            .await?;
        self.store.expire(&key, self.ttl).await?;
        Ok(())
    }

    /// All cursors in the document, keyed by connection id, with the display
    /// name taken from the room roster.
    pub async fn get_cursors(&self, doc_id: DocId) -> Result<BTreeMap<String, CursorData>, StoreError> {
        let stored = self.store.hgetall(&keys::cursors(doc_id)).await?;
        if stored.is_empty() {
            return Ok(BTreeMap::new());
        }
        let roster = self.store.hgetall(&keys::presence(doc_id)).await?;

        let mut cursors = BTreeMap::new();
        for (conn_id, raw) in stored {
            let mut cursor: CursorData = match serde_json::from_str(&raw) {
                Ok(cursor) => cursor,
                Err(e) => {
                    warn!("Skipping unreadable cursor {} in document {}: {}", conn_id, doc_id, e);
                    continue;
                }
            };
            if let Some(name) = roster.get(&conn_id) {
                cursor.username = name.clone();
            } else if cursor.username.is_empty() {
                cursor.username = UNKNOWN_USER.to_string();
            }
            cursors.insert(conn_id, cursor);
        }
        Ok(cursors)
    }

    pub async fn remove_cursor(&self, doc_id: DocId, conn_id: &str) -> Result<bool, StoreError> {
        self.store.hdel(&keys::cursors(doc_id), conn_id).await
    }
}
