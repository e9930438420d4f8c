use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::DocId;
use crate::models::{
    ApiError, CreateVersionRequest, ErrorResponse, VersionListResponse, VersionResponse, VersionSummary,
};
use crate::state::AppState;

fn storage_error(doc_id: DocId, e: impl std::fmt::Display) -> ApiError {
    error!("Storage error for document {}: {}", doc_id, e);
    ErrorResponse::with_status(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("Error loading versions of document {}", doc_id),
    )
}

fn document_not_found(doc_id: DocId) -> ApiError {
    ErrorResponse::with_status(StatusCode::NOT_FOUND, format!("Document {} not found", doc_id))
}

/// List the versions of a document, newest first
pub async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<DocId>,
) -> Result<(StatusCode, Json<VersionListResponse>), ApiError> {
    let versions = state
        .versions
        .list_versions(doc_id)
        .await
        .map_err(|e| storage_error(doc_id, e))?;

    Ok((
        StatusCode::OK,
        Json(VersionListResponse {
            document_id: doc_id,
            versions: versions.iter().map(VersionSummary::from).collect(),
        }),
    ))
}

/// Get one version of a document
pub async fn get_version(
    State(state): State<Arc<AppState>>,
    Path((doc_id, version)): Path<(DocId, i64)>,
) -> Result<(StatusCode, Json<VersionResponse>), ApiError> {
    match state.versions.get_version(doc_id, version).await {
        Ok(Some(v)) => Ok((StatusCode::OK, Json(v.into()))),
        Ok(None) => {
            warn!("Version {} of document {} not found", version, doc_id);
            Err(ErrorResponse::with_status(
                StatusCode::NOT_FOUND,
                format!("Version {} of document {} not found", version, doc_id),
            ))
        }
        Err(e) => Err(storage_error(doc_id, e)),
    }
}

/// Record the document's current content as a new version.
///
/// Pending edits are written first so the version reflects them.
pub async fn create_version(
    State(state): State<Arc<AppState>>,
    Path(doc_id): Path<DocId>,
    request: Option<Json<CreateVersionRequest>>,
) -> Result<(StatusCode, Json<VersionResponse>), ApiError> {
    let created_by = request.and_then(|Json(r)| r.created_by);

    state.persistence.flush(doc_id).await;
    let snapshot = match state.persistence.get_snapshot(doc_id).await {
        Ok(Some(snapshot)) => snapshot,
        Ok(None) => return Err(document_not_found(doc_id)),
        Err(e) => return Err(storage_error(doc_id, e)),
    };

    match state
        .versions
        .create_version(doc_id, &snapshot.content, created_by)
        .await
    {
        Ok(Some(v)) => {
            info!("Version {} of document {} created on request", v.version, doc_id);
            Ok((StatusCode::CREATED, Json(v.into())))
        }
        Ok(None) => Err(document_not_found(doc_id)),
        Err(e) => Err(storage_error(doc_id, e)),
    }
}
