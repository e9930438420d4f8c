use utoipa::OpenApi;
use crate::models::*;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Readiness check endpoint
#[utoipa::path(
    get,
    path = "/api/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadyResponse)
    )
)]
#[allow(dead_code)]
pub async fn ready_check_doc() {}

/// Connection, room and host statistics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Current diagnostics", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Users online anywhere
#[utoipa::path(
    get,
    path = "/api/v1/presence/active",
    responses(
        (status = 200, description = "Active users", body = ActiveUsersResponse),
        (status = 503, description = "Presence store unavailable", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn active_users_doc() {}

/// Presence counts for a batch of documents
#[utoipa::path(
    get,
    path = "/api/v1/presence/counts",
    params(PresenceCountsQuery),
    responses(
        (status = 200, description = "Connections per document", body = PresenceCountsResponse),
        (status = 400, description = "Malformed id list", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn presence_counts_doc() {}

/// List the versions of a document
#[utoipa::path(
    get,
    path = "/api/v1/documents/{doc_id}/versions",
    params(("doc_id" = i64, Path, description = "Document id")),
    responses(
        (status = 200, description = "Versions, newest first", body = VersionListResponse)
    )
)]
#[allow(dead_code)]
pub async fn list_versions_doc() {}

/// Snapshot the current content as a new version
#[utoipa::path(
    post,
    path = "/api/v1/documents/{doc_id}/versions",
    params(("doc_id" = i64, Path, description = "Document id")),
    request_body(content = CreateVersionRequest, description = "Optional author", content_type = "application/json"),
    responses(
        (status = 201, description = "Version created", body = VersionResponse),
        (status = 404, description = "Document not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn create_version_doc() {}

/// Get one version of a document
#[utoipa::path(
    get,
    path = "/api/v1/documents/{doc_id}/versions/{version}",
    params(
        ("doc_id" = i64, Path, description = "Document id"),
        ("version" = i64, Path, description = "Version number")
    ),
    responses(
        (status = 200, description = "The version", body = VersionResponse),
        (status = 404, description = "Version not found", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn get_version_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        ready_check_doc,
        diagnostics_doc,
        active_users_doc,
        presence_counts_doc,
        list_versions_doc,
        create_version_doc,
        get_version_doc,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            DiagnosticsResponse,
            ErrorResponse,
            ActiveUsersResponse,
            PresenceCountsResponse,
            VersionResponse,
            VersionSummary,
            VersionListResponse,
            CreateVersionRequest,
        )
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
