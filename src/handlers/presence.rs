use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, warn};

use crate::db::DocId;
use crate::models::{ActiveUsersResponse, ApiError, ErrorResponse, PresenceCountsQuery, PresenceCountsResponse};
use crate::state::AppState;

/// Users online anywhere
pub async fn active_users(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<ActiveUsersResponse>), ApiError> {
    let users = state.presence.list_active_users().await.map_err(|e| {
        error!("Failed to list active users: {}", e);
        ErrorResponse::with_status(StatusCode::SERVICE_UNAVAILABLE, "Presence store unavailable")
    })?;
    Ok((
        StatusCode::OK,
        Json(ActiveUsersResponse {
            count: users.len(),
            users,
        }),
    ))
}

/// Presence counts for a batch of documents
pub async fn presence_counts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PresenceCountsQuery>,
) -> Result<(StatusCode, Json<PresenceCountsResponse>), ApiError> {
    let doc_ids = parse_ids(&query.ids).map_err(|bad| {
        warn!("Invalid document id '{}' in presence query", bad);
        ErrorResponse::with_status(StatusCode::BAD_REQUEST, format!("Invalid document id '{}'", bad))
    })?;

    let counts = state
        .presence
        .count_presence_for_docs(&doc_ids)
        .await
        .map_err(|e| {
            error!("Failed to count presence: {}", e);
            ErrorResponse::with_status(StatusCode::SERVICE_UNAVAILABLE, "Presence store unavailable")
        })?;

    let counts: BTreeMap<String, usize> = counts
        .into_iter()
        .map(|(doc_id, count)| (doc_id.to_string(), count))
        .collect();
    Ok((StatusCode::OK, Json(PresenceCountsResponse { counts })))
}

/// Parse `1,2, 3`. Returns the offending token on failure.
fn parse_ids(raw: &str) -> Result<Vec<DocId>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<DocId>().map_err(|_| s.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ids() {
        assert_eq!(parse_ids("1, 2,,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_ids("").unwrap().is_empty());
        assert_eq!(parse_ids("4,abc").unwrap_err(), "abc");
    }
}
