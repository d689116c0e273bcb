//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reconcile::ReconcileError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Missing or unparsable identity header.
    Unauthorized(String),
    /// Reconciliation engine error.
    Reconcile(ReconcileError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Reconcile(err) => reconcile_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn reconcile_error_to_response(err: ReconcileError) -> (StatusCode, String) {
    match &err {
        ReconcileError::BookNotFound(_) | ReconcileError::ReservationNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        ReconcileError::Conflict(_) | ReconcileError::InvalidState(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        ReconcileError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        ReconcileError::Forbidden(_) => (StatusCode::FORBIDDEN, err.to_string()),
        ReconcileError::GatewayUnavailable(_) => (StatusCode::BAD_GATEWAY, err.to_string()),
        // transient optimistic-write race; the client should re-query
        ReconcileError::VersionConflict(_) => (StatusCode::CONFLICT, err.to_string()),
        ReconcileError::Ledger(_) => {
            tracing::error!(error = %err, "ledger failure");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        ApiError::Reconcile(err)
    }
}
