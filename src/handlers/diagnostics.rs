use axum::{extract::State, http::StatusCode, Json};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::{info, warn};

use crate::models::{ApiError, DiagnosticsResponse};
use crate::state::AppState;
use crate::ws::transport::Transport;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Connection, room and host statistics
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), ApiError> {
    let n_conn = state.hub.connection_count().await as u32;
    let n_rooms = state.hub.room_count().await as u32;
    let n_pending_writes = state.persistence.pending_count().await as u32;
    let n_active_users = match state.presence.list_active_users().await {
        Ok(users) => users.len() as u32,
        Err(e) => {
            warn!("Failed to count active users: {}", e);
            0
        }
    };

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}, Pending writes: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_rooms,
        n_pending_writes
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_rooms,
            n_pending_writes,
            n_active_users,
            uptime_secs: state.started_at.elapsed().as_secs(),
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
