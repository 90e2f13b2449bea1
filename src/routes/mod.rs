//! HTTP gateway: each sibling module owns one concern and exports a
//! subrouter; this module merges them and attaches the shared state.

use axum::Router;

use crate::AppState;

mod backup;
mod device;
mod health;
mod import;
mod readings;
mod settings;

// ---

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(readings::router())
        .merge(device::router())
        .merge(import::router())
        .merge(backup::router())
        .merge(settings::router())
        .merge(health::router())
        .with_state(state)
}
