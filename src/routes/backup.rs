//! Backup store endpoints: manual sync, status and derived stats.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::backup::{BackupInfo, BackupStats, SyncOutcome};
use crate::error::ApiResult;
use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/backup/sync", post(sync))
        .route("/api/backup/status", get(status))
        .route("/api/backup/stats", get(stats))
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    success: bool,
    outcome: SyncOutcome,
}

async fn sync(State(state): State<AppState>) -> ApiResult<Json<SyncResponse>> {
    // ---
    let outcome = state.backup.sync().await?;
    Ok(Json(SyncResponse {
        success: true,
        outcome,
    }))
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<BackupInfo>> {
    Ok(Json(state.backup.last_backup_info().await?))
}

async fn stats(State(state): State<AppState>) -> ApiResult<Json<BackupStats>> {
    Ok(Json(state.backup.backup_stats().await?))
}
