//! Shared key/TTL store used for presence, cursors, sessions and the snapshot cache.
//!
//! Every server instance talks to the same store through [`KvStore`], so the
//! command set mirrors what a networked key/value server offers: strings with
//! expiry, counters, hashes and sets, each addressed by a single key.
//! Operations on one key are atomic; nothing spans multiple keys.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryKvStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("key '{key}' holds a {found} value, expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Redis-like command surface over a shared, TTL-aware store.
///
/// Writes to an existing key keep its remaining TTL, except `set`, `expire`
/// and `incr_by` with a TTL, which re-arm it.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Returns `true` when the value was written.
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    async fn del(&self, key: &str) -> Result<bool, StoreError>;

    /// Re-arms the TTL of an existing key. Returns `false` if the key is gone.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64, StoreError>;

    async fn hset(&self, key: &str, field: &str, value: String) -> Result<(), StoreError>;

    async fn hdel(&self, key: &str, field: &str) -> Result<bool, StoreError>;

    async fn hgetall(&self, key: &str) -> Result<BTreeMap<String, String>, StoreError>;

    async fn hlen(&self, key: &str) -> Result<usize, StoreError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn srem(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn smembers(&self, key: &str) -> Result<BTreeSet<String>, StoreError>;
}

pub type SharedKvStore = Arc<dyn KvStore>;

/// Read a JSON value stored under `key`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KvStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Write `value` as JSON under `key`.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, raw, ttl).await
}

/// Key layout shared by all services.
pub mod keys {
    use crate::db::DocId;

    pub const ACTIVE_USERS_SET: &str = "presence:active:users";

    pub fn presence(doc_id: DocId) -> String {
        format!("doc:{}:presence", doc_id)
    }

    pub fn cursors(doc_id: DocId) -> String {
        format!("doc:{}:cursors", doc_id)
    }

    pub fn members(doc_id: DocId) -> String {
        format!("doc:{}:members", doc_id)
    }

    pub fn session(doc_id: DocId) -> String {
        format!("doc:{}:session", doc_id)
    }

    pub fn snapshot(doc_id: DocId) -> String {
        format!("doc:{}:snapshot", doc_id)
    }

    /// Connection ids a user has logged in on.
    pub fn user_conns(username: &str) -> String {
        format!("presence:user:{}:conns", username)
    }

    /// Liveness key of one logged-in connection.
    pub fn conn_alive(conn_id: &str) -> String {
        format!("presence:conn:{}", conn_id)
    }
}
