//! Study-plan item endpoints: classified listings and edit operations

use super::{ApiError, ApiResult};
use crate::db::study_plan_items::{self, TimeWindowUpdate};
use crate::AppState;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use lms_common::db::{ContentStructure, StoredStatus, StudyPlanItem};
use lms_common::status::{self, ItemSortKey, ItemStatus};
use lms_common::time::now_utc;
use lms_common::Error;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ListItemsQuery {
    pub status: Option<String>,
    pub course_id: Option<String>,
}

/// One listed item with its derived status
#[derive(Debug, Serialize)]
pub struct ItemView {
    pub study_plan_item_id: String,
    pub study_plan_id: String,
    pub content_structure: ContentStructure,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub school_date: Option<DateTime<Utc>>,
    pub display_order: i64,
    pub status: ItemStatus,
}

fn sort_key(item: &StudyPlanItem) -> ItemSortKey {
    ItemSortKey {
        start_date: item.start_date,
        display_order: item.display_order,
        item_id: item.study_plan_item_id.clone(),
    }
}

fn to_view(item: StudyPlanItem, derived: ItemStatus) -> ItemView {
    ItemView {
        study_plan_item_id: item.study_plan_item_id,
        study_plan_id: item.study_plan_id,
        content_structure: item.content_structure,
        start_date: item.start_date,
        end_date: item.end_date,
        school_date: item.school_date,
        display_order: item.display_order,
        status: derived,
    }
}

/// `GET /api/students/:student_id/study-plan-items`
///
/// Visible items classified at request time. With `?status=`, only that
/// bucket, in its contract order. Without a filter, buckets are listed
/// current-first (active, upcoming, overdue, completed), each internally
/// ordered by its own contract.
pub async fn list_student_items(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(query): Query<ListItemsQuery>,
) -> ApiResult<Json<Vec<ItemView>>> {
    let filter = match query.status.as_deref() {
        None => None,
        Some(s) => Some(ItemStatus::from_str(s).ok_or_else(|| {
            ApiError(Error::InvalidInput(format!("unknown status {s:?}")))
        })?),
    };

    let now = now_utc();
    let items = study_plan_items::visible_items_for_student(
        &state.db,
        &student_id,
        query.course_id.as_deref(),
        now,
    )
    .await?;

    Ok(Json(classify_and_sort(items, now, filter)))
}

/// Classify items at `now`, drop anything outside the optional status
/// filter, and apply the listing sort contract: buckets current-first,
/// Active/Upcoming by `cmp_current`, Completed/Overdue by `cmp_past`.
fn classify_and_sort(
    items: Vec<StudyPlanItem>,
    now: DateTime<Utc>,
    filter: Option<ItemStatus>,
) -> Vec<ItemView> {
    let mut classified: Vec<(ItemStatus, StudyPlanItem)> = items
        .into_iter()
        .map(|item| (status::classify(now, &item.window()), item))
        .filter(|(derived, _)| filter.map_or(true, |f| f == *derived))
        .collect();

    let bucket_rank = |s: ItemStatus| match s {
        ItemStatus::Active => 0,
        ItemStatus::Upcoming => 1,
        ItemStatus::Overdue => 2,
        ItemStatus::Completed => 3,
    };
    classified.sort_by(|(sa, a), (sb, b)| {
        bucket_rank(*sa).cmp(&bucket_rank(*sb)).then_with(|| {
            let (ka, kb) = (sort_key(a), sort_key(b));
            if sa.sorts_descending() {
                status::cmp_past(&ka, &kb)
            } else {
                status::cmp_current(&ka, &kb)
            }
        })
    });

    classified
        .into_iter()
        .map(|(derived, item)| to_view(item, derived))
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct MultiStudentQuery {
    /// Comma-separated student ids
    pub student_ids: String,
    pub course_id: Option<String>,
}

/// `GET /api/study-plan-items?student_ids=a,b`
///
/// Child items for a set of students, keyed by student, each list in the
/// same order as the single-student listing.
pub async fn items_for_students(
    State(state): State<AppState>,
    Query(query): Query<MultiStudentQuery>,
) -> ApiResult<Json<std::collections::BTreeMap<String, Vec<ItemView>>>> {
    let student_ids: Vec<&str> = query
        .student_ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if student_ids.is_empty() {
        return Err(ApiError(Error::InvalidInput(
            "student_ids is required".to_string(),
        )));
    }

    let now = now_utc();
    let mut by_student = std::collections::BTreeMap::new();
    for student_id in student_ids {
        let items = study_plan_items::visible_items_for_student(
            &state.db,
            student_id,
            query.course_id.as_deref(),
            now,
        )
        .await?;
        by_student.insert(student_id.to_string(), classify_and_sort(items, now, None));
    }

    Ok(Json(by_student))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    StartDate,
    EndDate,
    Both,
}

#[derive(Debug, Deserialize)]
pub struct TimeWindowBody {
    pub update_type: UpdateKind,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// `PATCH /api/study-plan-items/:id/time-window`
pub async fn set_time_window(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Json(body): Json<TimeWindowBody>,
) -> ApiResult<Json<ItemView>> {
    let missing =
        |field: &str| ApiError(Error::InvalidInput(format!("{field} is required")));

    let update = match body.update_type {
        UpdateKind::StartDate => {
            TimeWindowUpdate::StartDate(body.start_date.ok_or_else(|| missing("start_date"))?)
        }
        UpdateKind::EndDate => {
            TimeWindowUpdate::EndDate(body.end_date.ok_or_else(|| missing("end_date"))?)
        }
        UpdateKind::Both => TimeWindowUpdate::Both {
            start_date: body.start_date.ok_or_else(|| missing("start_date"))?,
            end_date: body.end_date.ok_or_else(|| missing("end_date"))?,
        },
    };

    let now = now_utc();
    let item = study_plan_items::set_time_window(&state.db, &item_id, update, now).await?;
    let derived = status::classify(now, &item.window());
    Ok(Json(to_view(item, derived)))
}

#[derive(Debug, Deserialize)]
pub struct SchoolDateBody {
    pub school_date: Option<DateTime<Utc>>,
}

/// `PATCH /api/study-plan-items/:id/school-date`
pub async fn set_school_date(
    State(state): State<AppState>,
    Path(item_id): Path<String>,
    Json(body): Json<SchoolDateBody>,
) -> ApiResult<Json<serde_json::Value>> {
    study_plan_items::set_school_date(&state.db, &item_id, body.school_date, now_utc()).await?;
    Ok(Json(serde_json::json!({ "updated": 1 })))
}

#[derive(Debug, Deserialize)]
pub struct BulkStatusBody {
    pub study_plan_item_ids: Vec<String>,
    pub status: String,
}

/// `POST /api/study-plan-items/status`
///
/// Stored-status update (Active/Archived). Archived is terminal for
/// listings; it is never derived from time fields.
pub async fn bulk_set_status(
    State(state): State<AppState>,
    Json(body): Json<BulkStatusBody>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = StoredStatus::from_str(&body.status).ok_or_else(|| {
        ApiError(Error::InvalidInput(format!(
            "unknown status {:?}",
            body.status
        )))
    })?;

    let updated =
        study_plan_items::bulk_set_status(&state.db, &body.study_plan_item_ids, status, now_utc())
            .await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}
