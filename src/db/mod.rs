pub mod dbdocs;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub use dbdocs::PgDocumentStore;
pub use memory::MemoryDocumentStore;

pub type DocId = i64;
pub type UserId = i64;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("document {0} not found")]
    NotFound(DocId),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Document row from the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Document {
    pub id: DocId,
    pub title: String,
    pub content: String,
    pub version: i64,
    pub owner_id: Option<UserId>,
    pub owner_user_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable snapshot of a document's content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DocumentVersion {
    pub id: i64,
    pub document_id: DocId,
    pub content: String,
    pub version: i64,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Chat message row, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub document_id: DocId,
    pub author_id: UserId,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Durable storage the session core reads from and writes to.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(
        &self,
        title: &str,
        content: &str,
        owner_id: Option<UserId>,
    ) -> Result<Document, DbError>;

    async fn get_document(&self, id: DocId) -> Result<Option<Document>, DbError>;

    /// Write the latest content. The stored version never decreases.
    async fn update_document_content(
        &self,
        id: DocId,
        content: &str,
        version: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    async fn get_current_version(&self, id: DocId) -> Result<Option<i64>, DbError>;

    /// Record a new version at `current + 1` and raise the document's version
    /// to match, in one transaction. `None` when the document does not exist.
    async fn insert_version_snapshot(
        &self,
        document_id: DocId,
        content: &str,
        created_by: Option<UserId>,
    ) -> Result<Option<DocumentVersion>, DbError>;

    /// Newest first.
    async fn list_versions(&self, document_id: DocId) -> Result<Vec<DocumentVersion>, DbError>;

    async fn get_version(
        &self,
        document_id: DocId,
        version: i64,
    ) -> Result<Option<DocumentVersion>, DbError>;

    async fn append_chat_message(
        &self,
        document_id: DocId,
        author_id: UserId,
        message: &str,
    ) -> Result<ChatMessage, DbError>;
}

pub type SharedDocumentStore = Arc<dyn DocumentStore>;
