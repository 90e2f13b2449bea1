//! `POST /api/sync/thingspeak-to-db`: background import of provider history.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::ingest;
use crate::AppState;

use super::readings::day_count;

// ---

pub fn router() -> Router<AppState> {
    Router::new().route("/api/sync/thingspeak-to-db", post(trigger_import))
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    days: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ImportAccepted {
    success: bool,
    message: String,
}

/// Validate `days`, schedule the import and answer `202 Accepted` at once.
async fn trigger_import(
    Query(q): Query<ImportQuery>,
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<ImportAccepted>)> {
    // ---
    let days = day_count(q.days)?;
    let store = state.store.clone();
    let client = state.telemetry.clone();
    tokio::spawn(async move {
        ingest::import_history(&store, &client, days).await;
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ImportAccepted {
            success: true,
            message: format!("Sync started for the last {days} days"),
        }),
    ))
}
