//! Study plan item queries
//!
//! All item creation funnels through [`insert_item`]: replication, curriculum
//! edits, and monitor repair share it, so a repaired row is indistinguishable
//! from one created at clone time.

use chrono::{DateTime, Utc};
use lms_common::db::{ContentStructure, StoredStatus, StudyPlanItem};
use lms_common::time::{fmt_ts, fmt_ts_opt, parse_ts, parse_ts_opt};
use lms_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

const ITEM_COLUMNS: &str = "study_plan_item_id, study_plan_id, copy_study_plan_item_id, \
     content_structure, content_structure_flatten, available_from, available_to, \
     start_date, end_date, completed_at, school_date, display_order, status, \
     created_at, updated_at, deleted_at";

pub(crate) fn item_from_row(row: &SqliteRow) -> Result<StudyPlanItem> {
    let status: String = row.get("status");
    let content: String = row.get("content_structure");
    Ok(StudyPlanItem {
        study_plan_item_id: row.get("study_plan_item_id"),
        study_plan_id: row.get("study_plan_id"),
        copy_study_plan_item_id: row.get("copy_study_plan_item_id"),
        content_structure: serde_json::from_str(&content)?,
        available_from: parse_ts_opt(row.get("available_from"))?,
        available_to: parse_ts_opt(row.get("available_to"))?,
        start_date: parse_ts_opt(row.get("start_date"))?,
        end_date: parse_ts_opt(row.get("end_date"))?,
        completed_at: parse_ts_opt(row.get("completed_at"))?,
        school_date: parse_ts_opt(row.get("school_date"))?,
        display_order: row.get("display_order"),
        status: StoredStatus::from_str(&status)
            .ok_or_else(|| Error::Internal(format!("bad item status {status:?}")))?,
        created_at: parse_ts(row.get::<&str, _>("created_at"))?,
        updated_at: parse_ts(row.get::<&str, _>("updated_at"))?,
        deleted_at: parse_ts_opt(row.get("deleted_at"))?,
    })
}

/// Insert an item, reviving any soft-deleted row occupying the same
/// `(study_plan_id, content_structure_flatten)` slot. Two live rows for the
/// same slot are impossible; a concurrent insert lands on the same conflict
/// target and the later writer's values win.
pub async fn insert_item(conn: &mut SqliteConnection, item: &StudyPlanItem) -> Result<()> {
    let content = serde_json::to_string(&item.content_structure)?;
    sqlx::query(
        r#"
        INSERT INTO study_plan_items (
            study_plan_item_id, study_plan_id, copy_study_plan_item_id,
            content_structure, content_structure_flatten,
            available_from, available_to, start_date, end_date,
            completed_at, school_date, display_order, status,
            created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        ON CONFLICT(study_plan_id, content_structure_flatten) DO UPDATE SET
            copy_study_plan_item_id = excluded.copy_study_plan_item_id,
            content_structure = excluded.content_structure,
            available_from = excluded.available_from,
            available_to = excluded.available_to,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            school_date = excluded.school_date,
            display_order = excluded.display_order,
            status = excluded.status,
            updated_at = excluded.updated_at,
            deleted_at = NULL
        "#,
    )
    .bind(&item.study_plan_item_id)
    .bind(&item.study_plan_id)
    .bind(&item.copy_study_plan_item_id)
    .bind(content)
    .bind(item.content_structure.flatten())
    .bind(fmt_ts_opt(item.available_from))
    .bind(fmt_ts_opt(item.available_to))
    .bind(fmt_ts_opt(item.start_date))
    .bind(fmt_ts_opt(item.end_date))
    .bind(fmt_ts_opt(item.completed_at))
    .bind(fmt_ts_opt(item.school_date))
    .bind(item.display_order)
    .bind(item.status.as_str())
    .bind(fmt_ts(item.created_at))
    .bind(fmt_ts(item.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Live items under a plan, display order ascending
pub async fn live_items_for_plan(
    conn: &mut SqliteConnection,
    study_plan_id: &str,
) -> Result<Vec<StudyPlanItem>> {
    let query = format!(
        "SELECT {ITEM_COLUMNS} FROM study_plan_items
         WHERE study_plan_id = ? AND deleted_at IS NULL
         ORDER BY display_order ASC, study_plan_item_id ASC"
    );
    let rows = sqlx::query(&query)
        .bind(study_plan_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(item_from_row).collect()
}

/// Get a live item, `NotFound` if missing or soft-deleted
pub async fn get_live_item(
    conn: &mut SqliteConnection,
    study_plan_item_id: &str,
) -> Result<StudyPlanItem> {
    let query = format!(
        "SELECT {ITEM_COLUMNS} FROM study_plan_items
         WHERE study_plan_item_id = ? AND deleted_at IS NULL"
    );
    let row = sqlx::query(&query)
        .bind(study_plan_item_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("study plan item {study_plan_item_id}")))?;

    item_from_row(&row)
}

/// Soft-delete all live items under the given plans
pub async fn soft_delete_items_for_plans(
    conn: &mut SqliteConnection,
    plan_ids: &[String],
    now: DateTime<Utc>,
) -> Result<u64> {
    if plan_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; plan_ids.len()].join(", ");
    let query = format!(
        "UPDATE study_plan_items SET deleted_at = ?, updated_at = ?
         WHERE deleted_at IS NULL AND study_plan_id IN ({placeholders})"
    );
    let mut q = sqlx::query(&query).bind(fmt_ts(now)).bind(fmt_ts(now));
    for id in plan_ids {
        q = q.bind(id);
    }
    Ok(q.execute(&mut *conn).await?.rows_affected())
}

/// Which of an item's time-window fields an edit touches
#[derive(Debug, Clone, Copy)]
pub enum TimeWindowUpdate {
    StartDate(DateTime<Utc>),
    EndDate(DateTime<Utc>),
    Both {
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    },
}

/// Edit an item's scheduling window, enforcing the ordering invariant
/// (`available_from <= start_date`, `end_date <= available_to`, and
/// `start_date <= end_date` whenever both ends are set).
pub async fn set_time_window(
    pool: &SqlitePool,
    study_plan_item_id: &str,
    update: TimeWindowUpdate,
    now: DateTime<Utc>,
) -> Result<StudyPlanItem> {
    let mut tx = pool.begin().await?;
    let item = get_live_item(&mut *tx, study_plan_item_id).await?;

    let (new_start, new_end) = match update {
        TimeWindowUpdate::StartDate(start) => (Some(start), item.end_date),
        TimeWindowUpdate::EndDate(end) => (item.start_date, Some(end)),
        TimeWindowUpdate::Both { start_date, end_date } => (Some(start_date), Some(end_date)),
    };

    validate_window(item.available_from, item.available_to, new_start, new_end)?;

    sqlx::query(
        "UPDATE study_plan_items SET start_date = ?, end_date = ?, updated_at = ?
         WHERE study_plan_item_id = ?",
    )
    .bind(fmt_ts_opt(new_start))
    .bind(fmt_ts_opt(new_end))
    .bind(fmt_ts(now))
    .bind(study_plan_item_id)
    .execute(&mut *tx)
    .await?;

    let updated = get_live_item(&mut *tx, study_plan_item_id).await?;
    tx.commit().await?;
    Ok(updated)
}

fn validate_window(
    available_from: Option<DateTime<Utc>>,
    available_to: Option<DateTime<Utc>>,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
) -> Result<()> {
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            return Err(Error::InvalidTimeWindow("end before start".to_string()));
        }
    }
    if let (Some(from), Some(start)) = (available_from, start_date) {
        if start < from {
            return Err(Error::InvalidTimeWindow(
                "start before available-from".to_string(),
            ));
        }
    }
    if let (Some(end), Some(to)) = (end_date, available_to) {
        if to < end {
            return Err(Error::InvalidTimeWindow(
                "end after available-to".to_string(),
            ));
        }
    }
    Ok(())
}

/// Set the school date on a copy item
pub async fn set_school_date(
    pool: &SqlitePool,
    study_plan_item_id: &str,
    school_date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE study_plan_items SET school_date = ?, updated_at = ?
         WHERE study_plan_item_id = ? AND deleted_at IS NULL",
    )
    .bind(fmt_ts_opt(school_date))
    .bind(fmt_ts(now))
    .bind(study_plan_item_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "study plan item {study_plan_item_id}"
        )));
    }
    Ok(())
}

/// Set the stored status on a batch of items. Returns the number updated.
pub async fn bulk_set_status(
    pool: &SqlitePool,
    study_plan_item_ids: &[String],
    status: StoredStatus,
    now: DateTime<Utc>,
) -> Result<u64> {
    if study_plan_item_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; study_plan_item_ids.len()].join(", ");
    let query = format!(
        "UPDATE study_plan_items SET status = ?, updated_at = ?
         WHERE deleted_at IS NULL AND study_plan_item_id IN ({placeholders})"
    );
    let mut q = sqlx::query(&query).bind(status.as_str()).bind(fmt_ts(now));
    for id in study_plan_item_ids {
        q = q.bind(id);
    }
    Ok(q.execute(pool).await?.rows_affected())
}

/// Mark an item completed (or clear the completion)
pub async fn set_completed_at(
    pool: &SqlitePool,
    study_plan_item_id: &str,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE study_plan_items SET completed_at = ?, updated_at = ?
         WHERE study_plan_item_id = ? AND deleted_at IS NULL",
    )
    .bind(fmt_ts_opt(completed_at))
    .bind(fmt_ts(now))
    .bind(study_plan_item_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!(
            "study plan item {study_plan_item_id}"
        )));
    }
    Ok(())
}

/// Items visible to a student at `now`: live membership, live plan, stored
/// status Active on both, inside the availability window. Classification
/// and the listing sort contract are applied by the caller.
pub async fn visible_items_for_student(
    pool: &SqlitePool,
    student_id: &str,
    course_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<StudyPlanItem>> {
    let query = format!(
        "SELECT i.{} FROM study_plan_items i
         INNER JOIN student_study_plans s ON i.study_plan_id = s.study_plan_id
         INNER JOIN study_plans sp ON sp.study_plan_id = i.study_plan_id
         WHERE s.student_id = ?1
           AND (?2 IS NULL OR sp.course_id = ?2)
           AND i.status = 'ACTIVE'
           AND sp.status = 'ACTIVE'
           AND i.available_from IS NOT NULL
           AND i.available_from <= ?3
           AND (i.available_to IS NULL OR ?3 <= i.available_to)
           AND i.deleted_at IS NULL
           AND s.deleted_at IS NULL
           AND sp.deleted_at IS NULL",
        ITEM_COLUMNS.replace(", ", ", i.")
    );
    let rows = sqlx::query(&query)
        .bind(student_id)
        .bind(course_id)
        .bind(fmt_ts(now))
        .fetch_all(pool)
        .await?;

    rows.iter().map(item_from_row).collect()
}

/// Build a fresh item row with defaults shared by every creation path
pub fn new_item(
    study_plan_id: &str,
    content_structure: ContentStructure,
    display_order: i64,
    now: DateTime<Utc>,
) -> StudyPlanItem {
    StudyPlanItem {
        study_plan_item_id: uuid::Uuid::new_v4().to_string(),
        study_plan_id: study_plan_id.to_string(),
        copy_study_plan_item_id: None,
        content_structure,
        available_from: None,
        available_to: None,
        start_date: None,
        end_date: None,
        completed_at: None,
        school_date: None,
        display_order,
        status: StoredStatus::Active,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}
