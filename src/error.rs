//! Error types shared across components and the HTTP boundary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

// ---

/// Failures of the primary store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No usable pool and reconnecting failed.
    #[error("primary store unavailable: {0}")]
    Unavailable(String),

    #[error("primary store query failed: {0}")]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Whether the error means the connection itself is gone, as opposed to a
    /// failed statement.
    pub fn is_connection_loss(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
        )
    }
}

/// Failures talking to the remote telemetry provider.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("request to telemetry provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("telemetry provider answered HTTP {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed telemetry payload: {0}")]
    Payload(String),

    #[error("telemetry request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Error returned by HTTP handlers: a status plus a client-safe message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "store error");
        match err {
            StoreError::Unavailable(_) => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "Storage unavailable")
            }
            StoreError::Database(_) => Self::internal("Database error"),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{err:#}"), "internal error");
        Self::internal("Internal server error")
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn connection_loss_is_detected() {
        // ---
        assert!(StoreError::is_connection_loss(&sqlx::Error::PoolClosed));
        assert!(StoreError::is_connection_loss(&sqlx::Error::PoolTimedOut));
        assert!(!StoreError::is_connection_loss(&sqlx::Error::RowNotFound));
    }

    #[test]
    fn store_errors_map_to_statuses() {
        // ---
        let unavailable: ApiError = StoreError::Unavailable("refused".into()).into();
        assert_eq!(unavailable.status, StatusCode::SERVICE_UNAVAILABLE);

        let failed: ApiError = StoreError::Database(sqlx::Error::RowNotFound).into();
        assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
