use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Error as SqlxError, Row};
use std::time::Duration;
use tracing::{debug, error, info};

use super::{ChatMessage, DbError, DocId, Document, DocumentStore, DocumentVersion, UserId};

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Postgres-backed document store
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    /// Create a new database connection pool
    ///
    /// # Arguments
    /// * `database_url` - PostgreSQL connection string
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create the tables the session core needs if they are missing
    pub async fn ensure_schema(&self) -> Result<(), SqlxError> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        info!("Database schema verified");
        Ok(())
    }

    fn log_pool_state(&self, action: &str, document_id: DocId) {
        let pool_idle = self.pool.num_idle() as u32;
        let pool_size = self.pool.size();
        debug!(
            "{} document {}. Pool connections: {} idle, {} in use",
            action,
            document_id,
            pool_idle,
            pool_size.saturating_sub(pool_idle)
        );
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create_document(
        &self,
        title: &str,
        content: &str,
        owner_id: Option<UserId>,
    ) -> Result<Document, DbError> {
        let query_sql = r#"
            INSERT INTO documents (title, content, owner_id, owner_user_name)
            VALUES ($1, $2, $3, (SELECT username FROM users WHERE id = $3))
            RETURNING id, title, content, version, owner_id, owner_user_name, created_at, updated_at;
        "#;
        let document = sqlx::query_as::<_, Document>(query_sql)
            .bind(title)
            .bind(content)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        info!("Document created: {} ('{}')", document.id, document.title);
        Ok(document)
    }

    async fn get_document(&self, id: DocId) -> Result<Option<Document>, DbError> {
        self.log_pool_state("Loading", id);

        let query_sql = r#"
            SELECT id, title, content, version, owner_id, owner_user_name, created_at, updated_at
            FROM documents
            WHERE id = $1;
        "#;
        let document = sqlx::query_as::<_, Document>(query_sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(document)
    }

    async fn update_document_content(
        &self,
        id: DocId,
        content: &str,
        version: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.log_pool_state("Updating", id);

        let query_sql = r#"
            UPDATE documents
            SET content = $1,
                version = GREATEST(version, $2),
                updated_at = $3
            WHERE id = $4
            RETURNING id;
        "#;
        let row = sqlx::query(query_sql)
            .bind(content)
            .bind(version)
            .bind(updated_at)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(_) => Ok(()),
            None => {
                error!("Document not found for content update: {}", id);
                Err(DbError::NotFound(id))
            }
        }
    }

    async fn get_current_version(&self, id: DocId) -> Result<Option<i64>, DbError> {
        let row = sqlx::query("SELECT version FROM documents WHERE id = $1;")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row.try_get("version")?)),
            None => Ok(None),
        }
    }

    async fn insert_version_snapshot(
        &self,
        document_id: DocId,
        content: &str,
        created_by: Option<UserId>,
    ) -> Result<Option<DocumentVersion>, DbError> {
        self.log_pool_state("Versioning", document_id);

        // Begin a transaction
        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    "Failed to acquire connection from pool for document {}: {}. Pool state: {} idle, {} total",
                    document_id,
                    e,
                    self.pool.num_idle(),
                    self.pool.size()
                );
                return Err(e.into());
            }
        };

        // Lock the document row so concurrent snapshots serialize
        let current = sqlx::query("SELECT version FROM documents WHERE id = $1 FOR UPDATE;")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await?;

        let current_version: i64 = match current {
            Some(row) => row.try_get("version")?,
            None => {
                tx.rollback().await?;
                return Ok(None);
            }
        };
        let next_version = current_version + 1;

        let insert_sql = r#"
            INSERT INTO document_versions (document_id, content, version, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING id, document_id, content, version, created_by, created_at;
        "#;
        let version = sqlx::query_as::<_, DocumentVersion>(insert_sql)
            .bind(document_id)
            .bind(content)
            .bind(next_version)
            .bind(created_by)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("UPDATE documents SET version = $1 WHERE id = $2;")
            .bind(next_version)
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        // Commit the transaction
        tx.commit().await?;

        info!("Document {} version {} recorded", document_id, next_version);
        Ok(Some(version))
    }

    async fn list_versions(&self, document_id: DocId) -> Result<Vec<DocumentVersion>, DbError> {
        let query_sql = r#"
            SELECT id, document_id, content, version, created_by, created_at
            FROM document_versions
            WHERE document_id = $1
            ORDER BY version DESC;
        "#;
        let versions = sqlx::query_as::<_, DocumentVersion>(query_sql)
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(versions)
    }

    async fn get_version(
        &self,
        document_id: DocId,
        version: i64,
    ) -> Result<Option<DocumentVersion>, DbError> {
        let query_sql = r#"
            SELECT id, document_id, content, version, created_by, created_at
            FROM document_versions
            WHERE document_id = $1 AND version = $2
            LIMIT 1;
        "#;
        let version = sqlx::query_as::<_, DocumentVersion>(query_sql)
            .bind(document_id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;
        Ok(version)
    }

    async fn append_chat_message(
        &self,
        document_id: DocId,
        author_id: UserId,
        message: &str,
    ) -> Result<ChatMessage, DbError> {
        let query_sql = r#"
            INSERT INTO chat_messages (document_id, author_id, message)
            VALUES ($1, $2, $3)
            RETURNING id, document_id, author_id, message, created_at;
        "#;
        let chat = sqlx::query_as::<_, ChatMessage>(query_sql)
            .bind(document_id)
            .bind(author_id)
            .bind(message)
            .fetch_one(&self.pool)
            .await?;
        Ok(chat)
    }
}
