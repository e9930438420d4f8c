//! Editing sessions. A session spans the time a document has at least one
//! member in its room and remembers the content it started from, so the end of
//! the session can decide whether a new version is worth recording.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::{DbError, DocId, DocumentVersion, UserId};
use crate::kv::{get_json, keys, set_json, SharedKvStore, StoreError};
use crate::services::versions::VersionService;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSession {
    pub document_id: DocId,
    pub has_edits: bool,
    pub original_content: String,
    pub current_content: String,
    pub created_by: Option<UserId>,
    /// Milliseconds since the Unix epoch
    pub last_edit_time: i64,
}

impl DocumentSession {
    /// Whether ending the session should produce a version.
    pub fn needs_version(&self) -> bool {
        self.has_edits && self.current_content != self.original_content
    }
}

#[derive(Clone)]
pub struct SessionTracker {
    store: SharedKvStore,
    versions: VersionService,
    ttl: Duration,
}

impl SessionTracker {
    pub fn new(store: SharedKvStore, versions: VersionService, ttl: Duration) -> Self {
        Self { store, versions, ttl }
    }

    pub async fn start_session(
        &self,
        document_id: DocId,
        content: &str,
        created_by: Option<UserId>,
    ) -> Result<(), StoreError> {
        let session = DocumentSession {
            document_id,
            has_edits: false,
            original_content: content.to_string(),
            current_content: content.to_string(),
            created_by,
            last_edit_time: Utc::now().timestamp_millis(),
        };
        set_json(self.store.as_ref(), &keys::session(document_id), &session, Some(self.ttl)).await?;
        info!("Session started for document {}", document_id);
        Ok(())
    }

    /// Record new content. Returns the session as it was before the update,
    /// or `None` (and does nothing) when no session is open.
    pub async fn update_session(
        &self,
        document_id: DocId,
        content: &str,
    ) -> Result<Option<DocumentSession>, StoreError> {
        let key = keys::session(document_id);
        let Some(previous) = get_json::<DocumentSession>(self.store.as_ref(), &key).await? else {
            debug!("Edit for document {} without an open session", document_id);
            return Ok(None);
        };

        let updated = DocumentSession {
            has_edits: true,
            current_content: content.to_string(),
            last_edit_time: Utc::now().timestamp_millis(),
            ..previous.clone()
        };
        set_json(self.store.as_ref(), &key, &updated, Some(self.ttl)).await?;
        Ok(Some(previous))
    }

    /// Re-arm the session TTL without touching its content.
    pub async fn touch_session(&self, document_id: DocId) -> Result<bool, StoreError> {
        self.store.expire(&keys::session(document_id), self.ttl).await
    }

    pub async fn get_session(&self, document_id: DocId) -> Result<Option<DocumentSession>, StoreError> {
        get_json(self.store.as_ref(), &keys::session(document_id)).await
    }

    /// Close the session, recording a version when the content changed.
    ///
    /// The session is deleted before the version is written, so a failed
    /// version write still leaves no session behind.
    pub async fn end_session(&self, document_id: DocId) -> Result<Option<DocumentVersion>, SessionError> {
        let key = keys::session(document_id);
        let session = get_json::<DocumentSession>(self.store.as_ref(), &key).await?;
        self.store.del(&key).await?;

        let Some(session) = session else {
            return Ok(None);
        };
        if !session.needs_version() {
            info!("Session for document {} ended without changes", document_id);
            return Ok(None);
        }

        let version = self
            .versions
            .create_version(document_id, &session.current_content, session.created_by)
            .await?;
        info!("Session for document {} ended", document_id);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentStore, MemoryDocumentStore};
    use crate::kv::{KvStore, MemoryKvStore};
    use std::sync::Arc;

    async fn setup() -> (SessionTracker, Arc<MemoryDocumentStore>, Arc<MemoryKvStore>, DocId) {
        let docs = Arc::new(MemoryDocumentStore::new());
        let doc = docs.create_document("Spec", "abc", None).await.unwrap();
        let kv = Arc::new(MemoryKvStore::new(100));
        let tracker = SessionTracker::new(
            kv.clone(),
            VersionService::new(docs.clone()),
            Duration::from_secs(300),
        );
        (tracker, docs, kv, doc.id)
    }

    #[tokio::test]
    async fn test_session_without_edits_creates_no_version() {
        let (tracker, docs, kv, doc_id) = setup().await;
        tracker.start_session(doc_id, "abc", Some(1)).await.unwrap();

        assert!(tracker.end_session(doc_id).await.unwrap().is_none());
        assert!(docs.list_versions(doc_id).await.unwrap().is_empty());
        assert!(kv.get(&keys::session(doc_id)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_edits_create_exactly_one_version() {
        let (tracker, docs, _, doc_id) = setup().await;
        tracker.start_session(doc_id, "abc", Some(1)).await.unwrap();

        let previous = tracker.update_session(doc_id, "abcd").await.unwrap().unwrap();
        assert_eq!(previous.current_content, "abc");
        assert!(!previous.has_edits);
        let previous = tracker.update_session(doc_id, "abcde").await.unwrap().unwrap();
        assert_eq!(previous.current_content, "abcd");

        let version = tracker.end_session(doc_id).await.unwrap().unwrap();
        assert_eq!(version.version, 1);
        assert_eq!(version.content, "abcde");
        assert_eq!(version.created_by, Some(1));
        assert_eq!(docs.list_versions(doc_id).await.unwrap().len(), 1);
        assert!(tracker.get_session(doc_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_edits_that_revert_create_no_version() {
        let (tracker, docs, _, doc_id) = setup().await;
        tracker.start_session(doc_id, "abc", None).await.unwrap();
        tracker.update_session(doc_id, "abX").await.unwrap();
        tracker.update_session(doc_id, "abc").await.unwrap();

        assert!(tracker.end_session(doc_id).await.unwrap().is_none());
        assert!(docs.list_versions(doc_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_without_session_is_noop() {
        let (tracker, _, _, doc_id) = setup().await;
        assert!(tracker.update_session(doc_id, "zzz").await.unwrap().is_none());
        assert!(tracker.get_session(doc_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_session_is_deleted_even_if_versioning_finds_no_document() {
        let kv = Arc::new(MemoryKvStore::new(100));
        let tracker = SessionTracker::new(
            kv.clone(),
            VersionService::new(Arc::new(MemoryDocumentStore::new())),
            Duration::from_secs(300),
        );
        tracker.start_session(77, "a", None).await.unwrap();
        tracker.update_session(77, "b").await.unwrap();

        assert!(tracker.end_session(77).await.unwrap().is_none());
        assert!(kv.get(&keys::session(77)).await.unwrap().is_none());
    }
}
