//! HTTP API handlers
//!
//! Thin surface over the engine: listings backed by the status classifier,
//! time-window and status edits, and the enrollment-event ingestion point.
//! Errors reach callers as structured JSON naming the violated invariant,
//! never as raw database errors.

pub mod events;
pub mod health;
pub mod items;
pub mod plans;
pub mod submissions;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lms_common::Error;

/// Wrapper mapping engine errors onto HTTP responses
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self.0 {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, format!("not found: {msg}")),
            Error::Conflict(msg) => (StatusCode::CONFLICT, format!("conflict: {msg}")),
            Error::InvalidTimeWindow(msg) => {
                (StatusCode::BAD_REQUEST, format!("invalid time window: {msg}"))
            }
            Error::InvalidInput(msg) => (StatusCode::BAD_REQUEST, format!("invalid input: {msg}")),
            other => {
                tracing::error!("internal error: {other}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Handler result shorthand
pub type ApiResult<T> = std::result::Result<T, ApiError>;
