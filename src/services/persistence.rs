//! Debounced write-behind for document content.
//!
//! Every edit overwrites the document's single pending slot and restarts its
//! timer; only the last content of a burst reaches the durable store. Writes
//! for one document never overlap.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::{DbError, DocId, SharedDocumentStore};
use crate::services::cache::{DocCache, Snapshot};

#[derive(Debug, Clone, Copy)]
pub struct PersistenceSettings {
    pub debounce: Duration,
    pub max_retries: u32,
    pub retry_base: Duration,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            max_retries: 3,
            retry_base: Duration::from_millis(100),
        }
    }
}

struct PendingUpdate {
    content: String,
    version: i64,
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct PendingSlots {
    slots: HashMap<DocId, PendingUpdate>,
    next_generation: u64,
}

struct Inner {
    store: SharedDocumentStore,
    cache: DocCache,
    settings: PersistenceSettings,
    pending: Mutex<PendingSlots>,
    write_locks: Mutex<HashMap<DocId, Arc<Mutex<()>>>>,
}

#[derive(Clone)]
pub struct PersistenceQueue {
    inner: Arc<Inner>,
}

impl PersistenceQueue {
    pub fn new(store: SharedDocumentStore, cache: DocCache, settings: PersistenceSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                cache,
                settings,
                pending: Mutex::new(PendingSlots::default()),
                write_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Replace the pending content for `doc_id` and restart its debounce timer.
    pub async fn queue_update(&self, doc_id: DocId, content: String, version: i64) {
        let mut pending = self.inner.pending.lock().await;
        pending.next_generation += 1;
        let generation = pending.next_generation;

        let inner = self.inner.clone();
        let debounce = self.inner.settings.debounce;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            inner.fire(doc_id, generation).await;
        });

        let replaced = pending.slots.insert(
            doc_id,
            PendingUpdate {
                content,
                version,
                generation,
                timer,
            },
        );
        if let Some(previous) = replaced {
            previous.timer.abort();
            debug!("Coalesced pending write for document {}", doc_id);
        }
    }

    /// Write the pending content for `doc_id` now, if any.
    pub async fn flush(&self, doc_id: DocId) {
        let taken = self.inner.pending.lock().await.slots.remove(&doc_id);
        if let Some(update) = taken {
            update.timer.abort();
            self.inner.write(doc_id, update.content, update.version).await;
        }
    }

    /// Write every pending update. Used on shutdown.
    pub async fn flush_all(&self) {
        let doc_ids: Vec<DocId> = self.inner.pending.lock().await.slots.keys().copied().collect();
        if !doc_ids.is_empty() {
            info!("Flushing {} pending document writes", doc_ids.len());
        }
        for doc_id in doc_ids {
            self.flush(doc_id).await;
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.slots.len()
    }

    /// Latest content for a document: unwritten edits first, then the cache,
    /// then the durable store. `None` when the document does not exist.
    pub async fn get_snapshot(&self, doc_id: DocId) -> Result<Option<Snapshot>, DbError> {
        if let Some(update) = self.inner.pending.lock().await.slots.get(&doc_id) {
            return Ok(Some(Snapshot {
                content: update.content.clone(),
                version: update.version,
            }));
        }

        match self.inner.cache.get(doc_id).await {
            Ok(Some(snapshot)) => return Ok(Some(snapshot)),
            Ok(None) => {}
            Err(e) => warn!("Cache read failed for document {}: {}", doc_id, e),
        }

        let Some(document) = self.inner.store.get_document(doc_id).await? else {
            return Ok(None);
        };
        let snapshot = Snapshot {
            content: document.content,
            version: document.version,
        };
        if let Err(e) = self.inner.cache.set_if_absent(doc_id, &snapshot).await {
            warn!("Cache populate failed for document {}: {}", doc_id, e);
        }
        Ok(Some(snapshot))
    }
}

impl Inner {
    async fn fire(&self, doc_id: DocId, generation: u64) {
        let taken = {
            let mut pending = self.pending.lock().await;
            let current = pending.slots.get(&doc_id).map(|update| update.generation);
            if current == Some(generation) {
                pending.slots.remove(&doc_id)
            } else {
                None
            }
        };
        if let Some(update) = taken {
            self.write(doc_id, update.content, update.version).await;
        }
    }

    async fn write_lock(&self, doc_id: DocId) -> Arc<Mutex<()>> {
        self.write_locks
            .lock()
            .await
            .entry(doc_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the document's lock once nobody else holds or waits on it.
    async fn release_write_lock(&self, doc_id: DocId, lock: Arc<Mutex<()>>) {
        let mut locks = self.write_locks.lock().await;
        let tracked = locks
            .get(&doc_id)
            .is_some_and(|current| Arc::ptr_eq(current, &lock));
        // One reference in the map, one in `lock`.
        if tracked && Arc::strong_count(&lock) == 2 {
            locks.remove(&doc_id);
        }
    }

    async fn write(&self, doc_id: DocId, content: String, version: i64) {
        let lock = self.write_lock(doc_id).await;
        {
            let _guard = lock.lock().await;
            self.write_with_retries(doc_id, content, version).await;
        }
        self.release_write_lock(doc_id, lock).await;
    }

    async fn write_with_retries(&self, doc_id: DocId, content: String, version: i64) {
        let mut attempt = 0;
        loop {
            match self
                .store
                .update_document_content(doc_id, &content, version, Utc::now())
                .await
            {
                Ok(()) => {
                    debug!("Persisted document {} at version {}", doc_id, version);
                    self.refresh_cache(doc_id, content, version).await;
                    return;
                }
                Err(DbError::NotFound(_)) => {
                    error!("Dropping write for missing document {}", doc_id);
                    return;
                }
                Err(e) if attempt < self.settings.max_retries => {
                    let backoff = self.settings.retry_base * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(
                        "Write for document {} failed (attempt {}): {}. Retrying in {:?}",
                        doc_id, attempt, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!(
                        "Giving up on write for document {} ({} bytes) after {} attempts: {}",
                        doc_id,
                        content.len(),
                        attempt + 1,
                        e
                    );
                    return;
                }
            }
        }
    }

    async fn refresh_cache(&self, doc_id: DocId, content: String, version: i64) {
        if let Err(e) = self.cache.invalidate(doc_id).await {
            warn!("Cache invalidate failed for document {}: {}", doc_id, e);
        }
        if let Err(e) = self.cache.set(doc_id, &Snapshot { content, version }).await {
            warn!("Cache refresh failed for document {}: {}", doc_id, e);
        }
    }
}
