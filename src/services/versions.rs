use tracing::{info, warn};

use crate::db::{DbError, DocId, DocumentVersion, SharedDocumentStore, UserId};

/// Immutable content snapshots of a document
#[derive(Clone)]
pub struct VersionService {
    store: SharedDocumentStore,
}

impl VersionService {
    pub fn new(store: SharedDocumentStore) -> Self {
        Self { store }
    }

    /// Record `content` as the next version of the document.
    ///
    /// Returns `None` when the document does not exist.
    pub async fn create_version(
        &self,
        document_id: DocId,
        content: &str,
        created_by: Option<UserId>,
    ) -> Result<Option<DocumentVersion>, DbError> {
        let version = self
            .store
            .insert_version_snapshot(document_id, content, created_by)
            .await?;
        match &version {
            Some(v) => info!(
                "Created version {} of document {} ({} chars)",
                v.version,
                document_id,
                content.chars().count()
            ),
            None => warn!("Cannot version missing document {}", document_id),
        }
        Ok(version)
    }

    pub async fn list_versions(&self, document_id: DocId) -> Result<Vec<DocumentVersion>, DbError> {
        self.store.list_versions(document_id).await
    }

    pub async fn get_version(
        &self,
        document_id: DocId,
        version: i64,
    ) -> Result<Option<DocumentVersion>, DbError> {
        self.store.get_version(document_id, version).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DocumentStore, MemoryDocumentStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_versions_follow_document_version() {
        let store = Arc::new(MemoryDocumentStore::new());
        let doc = store.create_document("Plan", "", None).await.unwrap();
        let versions = VersionService::new(store.clone());

        let first = versions.create_version(doc.id, "draft", Some(1)).await.unwrap().unwrap();
        let second = versions.create_version(doc.id, "final", Some(2)).await.unwrap().unwrap();

        assert_eq!((first.version, second.version), (1, 2));
        assert_eq!(store.get_current_version(doc.id).await.unwrap(), Some(2));
        assert_eq!(versions.get_version(doc.id, 1).await.unwrap().unwrap().content, "draft");
        assert_eq!(versions.list_versions(doc.id).await.unwrap()[0].content, "final");
    }

    #[tokio::test]
    async fn test_missing_document_yields_no_version() {
        let versions = VersionService::new(Arc::new(MemoryDocumentStore::new()));
        assert!(versions.create_version(404, "x", None).await.unwrap().is_none());
        assert!(versions.get_version(404, 1).await.unwrap().is_none());
    }
}
