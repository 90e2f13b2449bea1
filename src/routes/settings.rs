//! Setpoints and settings singletons: read and full-replace update.

use axum::{extract::State, routing::get, Json, Router};

use crate::error::{ApiError, ApiResult};
use crate::models::{Setpoints, Settings};
use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/setpoints", get(get_setpoints).post(update_setpoints))
        .route("/api/settings", get(get_settings).post(update_settings))
}

async fn get_setpoints(State(state): State<AppState>) -> ApiResult<Json<Setpoints>> {
    Ok(Json(state.store.setpoints().await?))
}

async fn update_setpoints(
    State(state): State<AppState>,
    Json(body): Json<Setpoints>,
) -> ApiResult<Json<Setpoints>> {
    // ---
    body.validate().map_err(ApiError::bad_request)?;
    let saved = state.store.update_setpoints(&body).await?;
    tracing::info!(?saved, "Setpoints updated");
    Ok(Json(saved))
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<Settings>> {
    Ok(Json(state.store.settings().await?))
}

async fn update_settings(
    State(state): State<AppState>,
    Json(body): Json<Settings>,
) -> ApiResult<Json<Settings>> {
    // ---
    body.validate().map_err(ApiError::bad_request)?;
    let saved = state.store.update_settings(&body).await?;
    tracing::info!(system_name = %saved.system_name, "Settings updated");
    Ok(Json(saved))
}
