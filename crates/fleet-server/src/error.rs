//! Maps the error taxonomy onto HTTP status codes. Validation stays
//! 400, capacity and duplicate-handle conflicts are 409, policy denials
//! are 403, missing resources are 404, and anything else collapses to
//! 500 — the taxonomy itself lives in `worker_manager::WorkerManagerError`
//! and `anyhow::Error`, not here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use worker_manager::WorkerManagerError;

pub enum ApiError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Forbidden(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(err) => {
                tracing::error!(error = %err, "internal error handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<WorkerManagerError> for ApiError {
    fn from(e: WorkerManagerError) -> Self {
        match e {
            WorkerManagerError::MaxWorkersReached { .. } => ApiError::Conflict(e.to_string()),
            WorkerManagerError::DuplicateHandle { .. } => ApiError::Conflict(e.to_string()),
            WorkerManagerError::SpawnDenied { .. } => ApiError::Forbidden(e.to_string()),
            WorkerManagerError::NativeRequiredButUnavailable => ApiError::Validation(e.to_string()),
            WorkerManagerError::InvalidModeInNativeOnly { .. } => ApiError::Validation(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}
