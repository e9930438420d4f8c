use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::db::DocId;
use crate::kv::{get_json, keys, SharedKvStore, StoreError};

/// Latest known content of a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Snapshot {
    pub content: String,
    pub version: i64,
}

/// Short-lived snapshot cache in the shared store.
#[derive(Clone)]
pub struct DocCache {
    store: SharedKvStore,
    ttl: Duration,
}

impl DocCache {
    pub fn new(store: SharedKvStore, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// A corrupt entry is treated as a miss.
    pub async fn get(&self, doc_id: DocId) -> Result<Option<Snapshot>, StoreError> {
        match get_json::<Snapshot>(self.store.as_ref(), &keys::snapshot(doc_id)).await {
            Ok(hit) => Ok(hit),
            Err(StoreError::Serialization(e)) => {
                warn!("Discarding corrupt cache entry for document {}: {}", doc_id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn set(&self, doc_id: DocId, snapshot: &Snapshot) -> Result<(), StoreError> {
        let raw = serde_json::to_string(snapshot)?;
        self.store
            .set(&keys::snapshot(doc_id), raw, Some(self.ttl))
            .await
    }

    /// Populate only if nothing newer got there first.
    pub async fn set_if_absent(&self, doc_id: DocId, snapshot: &Snapshot) -> Result<bool, StoreError> {
        let raw = serde_json::to_string(snapshot)?;
        let written = self
            .store
            .set_if_absent(&keys::snapshot(doc_id), raw, Some(self.ttl))
            .await?;
        if !written {
            debug!("Cache for document {} already populated", doc_id);
        }
        Ok(written)
    }

    pub async fn invalidate(&self, doc_id: DocId) -> Result<(), StoreError> {
        self.store.del(&keys::snapshot(doc_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKvStore};
    use std::sync::Arc;

    fn snapshot(content: &str, version: i64) -> Snapshot {
        Snapshot { content: content.to_string(), version }
    }

    #[tokio::test]
    async fn test_set_get_invalidate() {
        let cache = DocCache::new(Arc::new(MemoryKvStore::new(100)), Duration::from_secs(30));
        assert_eq!(cache.get(1).await.unwrap(), None);

        cache.set(1, &snapshot("hello", 3)).await.unwrap();
        assert_eq!(cache.get(1).await.unwrap(), Some(snapshot("hello", 3)));

        cache.invalidate(1).await.unwrap();
        assert_eq!(cache.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_populate_does_not_overwrite_newer_entry() {
        let cache = DocCache::new(Arc::new(MemoryKvStore::new(100)), Duration::from_secs(30));
        cache.set(1, &snapshot("fresh", 4)).await.unwrap();
        assert!(!cache.set_if_absent(1, &snapshot("stale", 2)).await.unwrap());
        assert_eq!(cache.get(1).await.unwrap(), Some(snapshot("fresh", 4)));
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let store = Arc::new(MemoryKvStore::new(100));
        store.set(&keys::snapshot(1), "{not json".into(), None).await.unwrap();
        let cache = DocCache::new(store, Duration::from_secs(30));
        assert_eq!(cache.get(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let cache = DocCache::new(Arc::new(MemoryKvStore::new(100)), Duration::from_millis(30));
        cache.set(1, &snapshot("x", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get(1).await.unwrap(), None);
    }
}
