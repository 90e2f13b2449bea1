// src/routes/health.rs
//! Liveness endpoint.
//!
//! `GET /health` answers from memory only, so orchestrators and CI can tell
//! the process is serving even while a store or the provider is down.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Handle `GET /health`. Does not touch storage or the provider.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Subrouter with the `/health` route, generic over the gateway state.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        // ---
        let Json(body) = health().await;
        assert_eq!(body.status, "ok");
    }
}
