use axum::{
    http::HeaderValue,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;
use utoipa::OpenApi;

use crate::docs::ApiDoc;
use crate::handlers::{
    active_users, create_version, diagnostics, get_version, health_check, list_versions,
    presence_counts, ready_check,
};
use crate::state::AppState;
use crate::ws::websocket_handler;

/// Create API routes
pub fn create_api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/presence/active", get(active_users))
        .route("/v1/presence/counts", get(presence_counts))
        .route("/v1/documents/:doc_id/versions", get(list_versions).post(create_version))
        .route("/v1/documents/:doc_id/versions/:version", get(get_version))
        .with_state(state)
}

/// The whole application: REST API, OpenAPI document and the WebSocket endpoint
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = cors_layer(state.config.cors_origins.as_deref());
    Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state.clone())
        .nest("/api", create_api_routes(state))
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let origins = match origins.map(str::trim) {
        None | Some("") | Some("*") => return base.allow_origin(Any),
        Some(list) => list,
    };

    let allowed: Vec<HeaderValue> = origins
        .split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    base.allow_origin(allowed)
}
