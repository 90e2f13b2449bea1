//! Device status and actuator control.
//!
//! Control requests update the actuator cache and answer at once; the
//! provider write runs on its own task and its outcome is only logged.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::device_status::{self, DeviceStatus};
use crate::error::ApiResult;
use crate::telemetry::{HEATER_FIELD, PUMP_FIELD};
use crate::AppState;

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/device/status", get(status))
        .route("/api/control/pump", post(control_pump))
        .route("/api/control/heater", post(control_heater))
}

#[derive(Debug, Deserialize)]
struct ControlRequest {
    status: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PumpResponse {
    success: bool,
    pump_status: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeaterResponse {
    success: bool,
    heater_status: bool,
}

async fn status(State(state): State<AppState>) -> ApiResult<Json<DeviceStatus>> {
    // ---
    let status = device_status::status(&state.actuators, &state.store).await?;
    Ok(Json(status))
}

async fn control_pump(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> Json<PumpResponse> {
    // ---
    let updated = state.actuators.set_pump(req.status).await;
    info!(pump = updated.pump_status, "Pump command accepted");
    spawn_remote_write(&state, PUMP_FIELD, req.status);
    Json(PumpResponse {
        success: true,
        pump_status: updated.pump_status,
    })
}

async fn control_heater(
    State(state): State<AppState>,
    Json(req): Json<ControlRequest>,
) -> Json<HeaterResponse> {
    // ---
    let updated = state.actuators.set_heater(req.status).await;
    info!(heater = updated.heater_status, "Heater command accepted");
    spawn_remote_write(&state, HEATER_FIELD, req.status);
    Json(HeaterResponse {
        success: true,
        heater_status: updated.heater_status,
    })
}

/// Fire-and-forget provider write. Never touches the cache.
fn spawn_remote_write(state: &AppState, field: &'static str, value: bool) {
    let client = state.telemetry.clone();
    tokio::spawn(async move {
        if client.write_field(field, value).await {
            info!(field, value, "Provider accepted actuator write");
        } else {
            warn!(
                field,
                value, "Provider rejected actuator write; reconciliation will settle the cache"
            );
        }
    });
}
