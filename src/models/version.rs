use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::DocumentVersion;

/// A stored document version
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub id: i64,
    pub document_id: i64,
    pub version: i64,
    pub content: String,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<DocumentVersion> for VersionResponse {
    fn from(v: DocumentVersion) -> Self {
        Self {
            id: v.id,
            document_id: v.document_id,
            version: v.version,
            content: v.content,
            created_by: v.created_by,
            created_at: v.created_at,
        }
    }
}

/// Version listing entry, without content
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub version: i64,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    /// Content length in characters
    pub length: usize,
}

impl From<&DocumentVersion> for VersionSummary {
    fn from(v: &DocumentVersion) -> Self {
        Self {
            version: v.version,
            created_by: v.created_by,
            created_at: v.created_at,
            length: v.content.chars().count(),
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct VersionListResponse {
    pub document_id: i64,
    pub versions: Vec<VersionSummary>,
}

/// Request to snapshot the current content as a new version
#[derive(Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateVersionRequest {
    pub created_by: Option<i64>,
}
