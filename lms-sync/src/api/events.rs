//! Enrollment event ingestion
//!
//! The durable bus delivers student-package events over HTTP; this endpoint
//! enqueues them for the consumer loop and returns 202. Application (and
//! the implied acknowledgement) happens after the transactional write, so
//! delivery stays at-least-once end to end.

use super::{ApiError, ApiResult};
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use lms_common::events::StudentPackageEvent;
use lms_common::Error;

/// `POST /api/enrollment-events`
pub async fn ingest_event(
    State(state): State<AppState>,
    Json(event): Json<StudentPackageEvent>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if event.student_id.is_empty() {
        return Err(ApiError(Error::InvalidInput(
            "student_id is required".to_string(),
        )));
    }
    if event.packages.is_empty() {
        return Err(ApiError(Error::InvalidInput(
            "at least one package is required".to_string(),
        )));
    }

    state
        .events_tx
        .send(event)
        .await
        .map_err(|_| ApiError(Error::Internal("event queue closed".to_string())))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "accepted": true })),
    ))
}
