//! Submission and grading endpoints

use super::ApiResult;
use crate::ledger;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use lms_common::db::{StudentSubmission, StudentSubmissionGrade};
use lms_common::time::now_utc;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub student_id: String,
    pub content: Option<String>,
}

/// `POST /api/study-plan-items/:id/submissions`; always appends
pub async fn submit(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Json(body): Json<SubmitBody>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = ledger::submit(
        &state.db,
        &item_id,
        &body.student_id,
        body.content.as_deref(),
        now_utc(),
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "student_submission_id": id })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct StudentQuery {
    pub student_id: String,
}

/// `GET /api/study-plan-items/:id/submissions/current`
pub async fn current_submission(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(query): Query<StudentQuery>,
) -> ApiResult<Json<Option<StudentSubmission>>> {
    let submission =
        ledger::current_submission(&state.db, &item_id, &query.student_id).await?;
    Ok(Json(submission))
}

#[derive(Debug, Deserialize)]
pub struct GradeBody {
    pub student_id: String,
    pub grade: f64,
    pub grader_id: Option<String>,
}

/// `POST /api/study-plan-items/:id/grades`; grades the submission current
/// at grading time
pub async fn grade(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Json(body): Json<GradeBody>,
) -> ApiResult<(StatusCode, Json<StudentSubmissionGrade>)> {
    let grade = ledger::grade_current(
        &state.db,
        &item_id,
        &body.student_id,
        body.grade,
        body.grader_id.as_deref(),
        now_utc(),
    )
    .await?;

    Ok((StatusCode::CREATED, Json(grade)))
}

/// `GET /api/study-plan-items/:id/grades/current`
pub async fn current_grade(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Query(query): Query<StudentQuery>,
) -> ApiResult<Json<Option<StudentSubmissionGrade>>> {
    let grade = ledger::current_grade(&state.db, &item_id, &query.student_id).await?;
    Ok(Json(grade))
}
