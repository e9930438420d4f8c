use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use super::{ChatMessage, DbError, DocId, Document, DocumentStore, DocumentVersion, UserId};

#[derive(Default)]
struct Tables {
    documents: HashMap<DocId, Document>,
    versions: Vec<DocumentVersion>,
    chat: Vec<ChatMessage>,
    next_document_id: i64,
    next_version_id: i64,
    next_chat_id: i64,
}

/// Process-local document store, used when no database is configured.
#[derive(Default)]
pub struct MemoryDocumentStore {
    tables: RwLock<Tables>,
    reads: AtomicUsize,
    content_writes: AtomicUsize,
    failures_to_inject: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        info!("Using in-memory document store");
        Self::default()
    }

    /// Number of `get_document` calls served so far.
    pub fn document_reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful `update_document_content` calls.
    pub fn content_writes(&self) -> usize {
        self.content_writes.load(Ordering::SeqCst)
    }

    /// Make the next `count` content writes fail with `DbError::Unavailable`.
    pub fn fail_next_writes(&self, count: usize) {
        self.failures_to_inject.store(count, Ordering::SeqCst);
    }

    /// Insert a document under a fixed id.
    pub async fn seed_document(&self, id: DocId, title: &str, content: &str) -> Document {
        let mut tables = self.tables.write().await;
        tables.next_document_id = tables.next_document_id.max(id);
        let now = Utc::now();
        let document = Document {
            id,
            title: title.to_string(),
            content: content.to_string(),
            version: 0,
            owner_id: None,
            owner_user_name: None,
            created_at: now,
            updated_at: now,
        };
        tables.documents.insert(id, document.clone());
        document
    }

    pub async fn chat_messages(&self, document_id: DocId) -> Vec<ChatMessage> {
        let tables = self.tables.read().await;
        tables
            .chat
            .iter()
            .filter(|m| m.document_id == document_id)
            .cloned()
            .collect()
    }

    fn take_injected_failure(&self) -> bool {
        self.failures_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create_document(
        &self,
        title: &str,
        content: &str,
        owner_id: Option<UserId>,
    ) -> Result<Document, DbError> {
        let mut tables = self.tables.write().await;
        tables.next_document_id += 1;
        let now = Utc::now();
        let document = Document {
            id: tables.next_document_id,
            title: title.to_string(),
            content: content.to_string(),
            version: 0,
            owner_id,
            owner_user_name: None,
            created_at: now,
            updated_at: now,
        };
        tables.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: DocId) -> Result<Option<Document>, DbError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.read().await.documents.get(&id).cloned())
    }

    async fn update_document_content(
        &self,
        id: DocId,
        content: &str,
        version: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if self.take_injected_failure() {
            return Err(DbError::Unavailable("injected write failure".to_string()));
        }
        let mut tables = self.tables.write().await;
        let document = tables.documents.get_mut(&id).ok_or(DbError::NotFound(id))?;
        document.content = content.to_string();
        document.version = document.version.max(version);
        document.updated_at = updated_at;
        self.content_writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_current_version(&self, id: DocId) -> Result<Option<i64>, DbError> {
        Ok(self.tables.read().await.documents.get(&id).map(|d| d.version))
    }

    async fn insert_version_snapshot(
        &self,
        document_id: DocId,
        content: &str,
        created_by: Option<UserId>,
    ) -> Result<Option<DocumentVersion>, DbError> {
        let mut tables = self.tables.write().await;
        let next_version = match tables.documents.get_mut(&document_id) {
            Some(document) => {
                document.version += 1;
                document.version
            }
            None => return Ok(None),
        };
        tables.next_version_id += 1;
        let version = DocumentVersion {
            id: tables.next_version_id,
            document_id,
            content: content.to_string(),
            version: next_version,
            created_by,
            created_at: Utc::now(),
        };
        tables.versions.push(version.clone());
        Ok(Some(version))
    }

    async fn list_versions(&self, document_id: DocId) -> Result<Vec<DocumentVersion>, DbError> {
        let tables = self.tables.read().await;
        let mut versions: Vec<DocumentVersion> = tables
            .versions
            .iter()
            .filter(|v| v.document_id == document_id)
            .cloned()
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    async fn get_version(
        &self,
        document_id: DocId,
        version: i64,
    ) -> Result<Option<DocumentVersion>, DbError> {
        let tables = self.tables.read().await;
        Ok(tables
            .versions
            .iter()
            .find(|v| v.document_id == document_id && v.version == version)
            .cloned())
    }

    async fn append_chat_message(
        &self,
        document_id: DocId,
        author_id: UserId,
        message: &str,
    ) -> Result<ChatMessage, DbError> {
        let mut tables = self.tables.write().await;
        if !tables.documents.contains_key(&document_id) {
            return Err(DbError::NotFound(document_id));
        }
        tables.next_chat_id += 1;
        let chat = ChatMessage {
            id: tables.next_chat_id,
            document_id,
            author_id,
            message: message.to_string(),
            created_at: Utc::now(),
        };
        tables.chat.push(chat.clone());
        Ok(chat)
    }
}
