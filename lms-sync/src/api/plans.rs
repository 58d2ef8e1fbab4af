//! Study-plan listing endpoints

use super::ApiResult;
use crate::db::study_plans;
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use lms_common::db::StudyPlan;
use serde::Deserialize;

const DEFAULT_PAGE_SIZE: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct ListPlansQuery {
    pub course_id: Option<String>,
    /// Keyset cursor: return plans with `study_plan_id` below this
    pub before: Option<String>,
    pub limit: Option<u32>,
}

/// `GET /api/students/:student_id/study-plans`
pub async fn list_student_plans(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(query): Query<ListPlansQuery>,
) -> ApiResult<Json<Vec<StudyPlan>>> {
    let plans = study_plans::list_plans_for_student(
        &state.db,
        &student_id,
        query.course_id.as_deref(),
        query.before.as_deref(),
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    )
    .await?;

    Ok(Json(plans))
}
