//! Who is in which document, and who is online anywhere.
//!
//! Two independent views live in the shared store:
//!
//! * a per-document roster hash (`connId -> username`) whose TTL is a rolling
//!   window re-armed by every join or heartbeat;
//! * a global active-user set backed by one liveness key per connection, so a
//!   user stays online while any of their connections keeps heartbeating.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::db::DocId;
use crate::kv::{keys, SharedKvStore, StoreError};

#[derive(Debug, Clone, Copy)]
pub struct PresenceTtls {
    pub roster: Duration,
    pub active_user: Duration,
    pub room_counter: Duration,
}

impl Default for PresenceTtls {
    fn default() -> Self {
        Self {
            roster: Duration::from_secs(300),
            active_user: Duration::from_secs(40),
            room_counter: Duration::from_secs(300),
        }
    }
}

/// A connection present in a document room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PresenceUser {
    pub id: String,
    pub username: String,
}

#[derive(Clone)]
pub struct PresenceRegistry {
    store: SharedKvStore,
    ttls: PresenceTtls,
}

impl PresenceRegistry {
    pub fn new(store: SharedKvStore, ttls: PresenceTtls) -> Self {
        Self { store, ttls }
    }

    pub async fn add_presence(
        &self,
        doc_id: DocId,
        conn_id: &str,
        username: &str,
    ) -> Result<(), StoreError> {
        let key = keys::presence(doc_id);
        self.store.hset(&key, conn_id, username.to_string()).await?;
        self.store.expire(&key, self.ttls.roster).await?;
        Ok(())
    }

    /// Absent entries are ignored.
    pub async fn remove_presence(&self, doc_id: DocId, conn_id: &str) -> Result<(), StoreError> {
        self.store.hdel(&keys::presence(doc_id), conn_id).await?;
        Ok(())
    }

    pub async fn list_presence(&self, doc_id: DocId) -> Result<Vec<PresenceUser>, StoreError> {
        let roster = self.store.hgetall(&keys::presence(doc_id)).await?;
        Ok(roster
            .into_iter()
            .map(|(id, username)| PresenceUser { id, username })
            .collect())
    }

    pub async fn count_presence(&self, doc_id: DocId) -> Result<usize, StoreError> {
        self.store.hlen(&keys::presence(doc_id)).await
    }

    pub async fn count_presence_for_docs(
        &self,
        doc_ids: &[DocId],
    ) -> Result<HashMap<DocId, usize>, StoreError> {
        let mut counts = HashMap::with_capacity(doc_ids.len());
        for &doc_id in doc_ids {
            counts.insert(doc_id, self.count_presence(doc_id).await?);
        }
        Ok(counts)
    }

    /// Count a connection into a room. Returns the member count after the change.
    ///
    /// The caller must already be in the roster. If the counter lapsed while
    /// others were still present it is rebuilt from the roster, so a late
    /// joiner never looks like the first member.
    pub async fn enter_room(&self, doc_id: DocId) -> Result<i64, StoreError> {
        let key = keys::members(doc_id);
        let members = self
            .store
            .incr_by(&key, 1, Some(self.ttls.room_counter))
            .await?;
        if members == 1 {
            let present = self.count_presence(doc_id).await? as i64;
            if present > 1 {
                warn!(
                    "Member counter for document {} had lapsed, rebuilding from {} present connections",
                    doc_id, present
                );
                return self
                    .store
                    .incr_by(&key, present - 1, Some(self.ttls.room_counter))
                    .await;
            }
        }
        Ok(members)
    }

    /// Count a connection out of a room. Returns the member count after the
    /// change, never below zero; the counter is dropped once the room is empty.
    ///
    /// The caller must already be out of the roster. A lapsed counter is
    /// rebuilt from whoever is still present instead of reporting an empty room.
    pub async fn exit_room(&self, doc_id: DocId) -> Result<i64, StoreError> {
        let key = keys::members(doc_id);
        let remaining = self
            .store
            .incr_by(&key, -1, Some(self.ttls.room_counter))
            .await?;
        if remaining > 0 {
            return Ok(remaining);
        }
        let present = self.count_presence(doc_id).await? as i64;
        if present > 0 {
            warn!(
                "Member counter for document {} had lapsed, rebuilding from {} present connections",
                doc_id, present
            );
            return self
                .store
                .incr_by(&key, present - remaining, Some(self.ttls.room_counter))
                .await;
        }
        self.store.del(&key).await?;
        Ok(0)
    }

    /// Re-arm the room counter while members are active in the room.
    pub async fn touch_room(&self, doc_id: DocId) -> Result<(), StoreError> {
        if !self
            .store
            .expire(&keys::members(doc_id), self.ttls.room_counter)
            .await?
        {
            debug!("No member counter to refresh for document {}", doc_id);
        }
        Ok(())
    }

    pub async fn mark_user_active(&self, username: &str, conn_id: &str) -> Result<(), StoreError> {
        self.store.sadd(keys::ACTIVE_USERS_SET, username).await?;
        self.store.sadd(&keys::user_conns(username), conn_id).await?;
        self.store
            .set(
                &keys::conn_alive(conn_id),
                username.to_string(),
                Some(self.ttls.active_user),
            )
            .await?;
        debug!("User {} active on connection {}", username, conn_id);
        Ok(())
    }

    /// Keep a connection's liveness key alive, re-creating it if it already lapsed.
    pub async fn heartbeat_user(&self, username: &str, conn_id: &str) -> Result<(), StoreError> {
        if !self
            .store
            .expire(&keys::conn_alive(conn_id), self.ttls.active_user)
            .await?
        {
            info!("Liveness key for {} lapsed, re-registering", username);
            self.mark_user_active(username, conn_id).await?;
        }
        Ok(())
    }

    pub async fn mark_user_inactive(&self, username: &str, conn_id: &str) -> Result<(), StoreError> {
        self.store.del(&keys::conn_alive(conn_id)).await?;
        self.store.srem(&keys::user_conns(username), conn_id).await?;
        if !self.prune_user(username).await? {
            debug!("User {} has no live connections left", username);
        }
        Ok(())
    }

    /// Users with at least one live connection. Stale entries are pruned.
    pub async fn list_active_users(&self) -> Result<Vec<String>, StoreError> {
        let members = self.store.smembers(keys::ACTIVE_USERS_SET).await?;
        let mut active = Vec::with_capacity(members.len());
        for username in members {
            if self.prune_user(&username).await? {
                active.push(username);
            }
        }
        Ok(active)
    }

    /// Drop lapsed connections of `username`, and the user itself when none
    /// are left. Returns whether the user is still active.
    async fn prune_user(&self, username: &str) -> Result<bool, StoreError> {
        let conns_key = keys::user_conns(username);
        let mut live = false;
        for conn_id in self.store.smembers(&conns_key).await? {
            if self.store.get(&keys::conn_alive(&conn_id)).await?.is_some() {
                live = true;
            } else {
                self.store.srem(&conns_key, &conn_id).await?;
            }
        }
        if !live {
            self.store.srem(keys::ACTIVE_USERS_SET, username).await?;
        }
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKvStore};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn registry_with(ttls: PresenceTtls) -> (PresenceRegistry, Arc<MemoryKvStore>) {
        let store = Arc::new(MemoryKvStore::new(1000));
        (PresenceRegistry::new(store.clone(), ttls), store)
    }

    fn registry() -> PresenceRegistry {
        registry_with(PresenceTtls::default()).0
    }

    #[tokio::test]
    async fn test_roster_add_list_remove() {
        let presence = registry();
        presence.add_presence(42, "c1", "alice").await.unwrap();
        presence.add_presence(42, "c2", "bob").await.unwrap();
        presence.add_presence(7, "c3", "carol").await.unwrap();

        assert_eq!(
            presence.list_presence(42).await.unwrap(),
            vec![
                PresenceUser { id: "c1".into(), username: "alice".into() },
                PresenceUser { id: "c2".into(), username: "bob".into() },
            ]
        );

        presence.remove_presence(42, "c1").await.unwrap();
        let counts = presence.count_presence_for_docs(&[42, 7, 99]).await.unwrap();
        assert_eq!(counts[&42], 1);
        assert_eq!(counts[&7], 1);
        assert_eq!(counts[&99], 0);
    }

    #[tokio::test]
    async fn test_removing_unknown_connection_is_a_noop() {
        let presence = registry();
        presence.add_presence(1, "c1", "alice").await.unwrap();
        presence.remove_presence(1, "ghost").await.unwrap();
        presence.remove_presence(2, "ghost").await.unwrap();
        assert_eq!(presence.count_presence(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_roster_expires_without_heartbeat() {
        let (presence, _) = registry_with(PresenceTtls {
            roster: Duration::from_millis(30),
            ..PresenceTtls::default()
        });
        presence.add_presence(1, "c1", "alice").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(presence.list_presence(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_room_counter_transitions() {
        let presence = registry();
        assert_eq!(presence.enter_room(5).await.unwrap(), 1);
        assert_eq!(presence.enter_room(5).await.unwrap(), 2);
        assert_eq!(presence.exit_room(5).await.unwrap(), 1);
        assert_eq!(presence.exit_room(5).await.unwrap(), 0);
        // A stray extra exit never goes negative and the next join starts fresh.
        assert_eq!(presence.exit_room(5).await.unwrap(), 0);
        assert_eq!(presence.enter_room(5).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_user_stays_active_while_any_connection_is_live() {
        let presence = registry();
        presence.mark_user_active("alice", "c1").await.unwrap();
        presence.mark_user_active("alice", "c2").await.unwrap();
        presence.mark_user_active("bob", "c3").await.unwrap();

        presence.mark_user_inactive("alice", "c1").await.unwrap();
        assert_eq!(presence.list_active_users().await.unwrap(), vec!["alice", "bob"]);

        presence.mark_user_inactive("alice", "c2").await.unwrap();
        assert_eq!(presence.list_active_users().await.unwrap(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_lapsed_liveness_keys_drop_users_and_heartbeat_revives() {
        let (presence, store) = registry_with(PresenceTtls {
            active_user: Duration::from_millis(30),
            ..PresenceTtls::default()
        });
        presence.mark_user_active("alice", "c1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(presence.list_active_users().await.unwrap().is_empty());
        assert!(store.smembers(keys::ACTIVE_USERS_SET).await.unwrap().is_empty());

        presence.heartbeat_user("alice", "c1").await.unwrap();
        assert_eq!(presence.list_active_users().await.unwrap(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_usernames_sharing_a_prefix_are_tracked_apart() {
        let presence = registry();
        presence.mark_user_active("bob", "c1").await.unwrap();
        presence.mark_user_active("bob:x", "c2").await.unwrap();

        presence.mark_user_inactive("bob", "c1").await.unwrap();
        assert_eq!(presence.list_active_users().await.unwrap(), vec!["bob:x"]);

        presence.mark_user_active("bob", "c3").await.unwrap();
        presence.mark_user_inactive("bob:x", "c2").await.unwrap();
        assert_eq!(presence.list_active_users().await.unwrap(), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_lapsed_room_counter_is_rebuilt_from_roster() {
        let (presence, store) = registry_with(PresenceTtls {
            room_counter: Duration::from_millis(30),
            ..PresenceTtls::default()
        });
        presence.add_presence(4, "c1", "alice").await.unwrap();
        assert_eq!(presence.enter_room(4).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get(&keys::members(4)).await.unwrap(), None);

        presence.add_presence(4, "c2", "bob").await.unwrap();
        assert_eq!(presence.enter_room(4).await.unwrap(), 2);

        presence.remove_presence(4, "c2").await.unwrap();
        assert_eq!(presence.exit_room(4).await.unwrap(), 1);
        presence.remove_presence(4, "c1").await.unwrap();
        assert_eq!(presence.exit_room(4).await.unwrap(), 0);
        assert_eq!(store.get(&keys::members(4)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lapsed_room_counter_never_reports_empty_room_with_members() {
        let (presence, _) = registry_with(PresenceTtls {
            room_counter: Duration::from_millis(30),
            ..PresenceTtls::default()
        });
        presence.add_presence(6, "c1", "alice").await.unwrap();
        presence.add_presence(6, "c2", "bob").await.unwrap();
        presence.enter_room(6).await.unwrap();
        presence.enter_room(6).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        presence.remove_presence(6, "c2").await.unwrap();
        assert_eq!(presence.exit_room(6).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_touch_room_keeps_counter_alive() {
        let (presence, store) = registry_with(PresenceTtls {
            room_counter: Duration::from_millis(100),
            ..PresenceTtls::default()
        });
        presence.enter_room(2).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            presence.touch_room(2).await.unwrap();
        }
        assert_eq!(store.get(&keys::members(2)).await.unwrap(), Some("1".to_string()));
    }
}
