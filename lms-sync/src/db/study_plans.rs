//! Study plan queries
//!
//! Masters (`master_study_plan_id IS NULL`) and their copy tree. The copy
//! tree is always re-derived from the store via a recursive closure query,
//! never held in memory as a pointer graph.

use chrono::{DateTime, Utc};
use lms_common::db::{PlanType, StoredStatus, StudyPlan};
use lms_common::time::{fmt_ts, parse_ts, parse_ts_opt};
use lms_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

const PLAN_COLUMNS: &str = "study_plan_id, master_study_plan_id, course_id, book_id, school_id, \
     name, status, plan_type, created_at, updated_at, deleted_at";

pub(crate) fn plan_from_row(row: &SqliteRow) -> Result<StudyPlan> {
    let status: String = row.get("status");
    let plan_type: String = row.get("plan_type");
    Ok(StudyPlan {
        study_plan_id: row.get("study_plan_id"),
        master_study_plan_id: row.get("master_study_plan_id"),
        course_id: row.get("course_id"),
        book_id: row.get("book_id"),
        school_id: row.get("school_id"),
        name: row.get("name"),
        status: StoredStatus::from_str(&status)
            .ok_or_else(|| Error::Internal(format!("bad plan status {status:?}")))?,
        plan_type: PlanType::from_str(&plan_type)
            .ok_or_else(|| Error::Internal(format!("bad plan type {plan_type:?}")))?,
        created_at: parse_ts(row.get::<&str, _>("created_at"))?,
        updated_at: parse_ts(row.get::<&str, _>("updated_at"))?,
        deleted_at: parse_ts_opt(row.get("deleted_at"))?,
    })
}

/// Insert a new study plan row
pub async fn insert_plan(conn: &mut SqliteConnection, plan: &StudyPlan) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO study_plans (
            study_plan_id, master_study_plan_id, course_id, book_id, school_id,
            name, status, plan_type, created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(&plan.study_plan_id)
    .bind(&plan.master_study_plan_id)
    .bind(&plan.course_id)
    .bind(&plan.book_id)
    .bind(plan.school_id)
    .bind(&plan.name)
    .bind(plan.status.as_str())
    .bind(plan.plan_type.as_str())
    .bind(fmt_ts(plan.created_at))
    .bind(fmt_ts(plan.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Get a live study plan, `NotFound` if missing or soft-deleted
pub async fn get_live_plan(conn: &mut SqliteConnection, study_plan_id: &str) -> Result<StudyPlan> {
    let query = format!(
        "SELECT {PLAN_COLUMNS} FROM study_plans
         WHERE study_plan_id = ? AND deleted_at IS NULL"
    );
    let row = sqlx::query(&query)
        .bind(study_plan_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::NotFound(format!("study plan {study_plan_id}")))?;

    plan_from_row(&row)
}

/// Live master plans attached to a course
pub async fn masters_for_course(
    conn: &mut SqliteConnection,
    course_id: &str,
) -> Result<Vec<StudyPlan>> {
    let query = format!(
        "SELECT {PLAN_COLUMNS} FROM study_plans
         WHERE course_id = ? AND master_study_plan_id IS NULL AND deleted_at IS NULL
         ORDER BY study_plan_id"
    );
    let rows = sqlx::query(&query)
        .bind(course_id)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter().map(plan_from_row).collect()
}

/// Every plan id reachable from `root_id` via `master_study_plan_id`,
/// including the root itself. Copies of copies are included (the tree is
/// shallow in practice but unbounded in principle).
pub async fn collect_plan_tree(
    conn: &mut SqliteConnection,
    root_id: &str,
) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        r#"
        WITH RECURSIVE plan_tree(id) AS (
            SELECT study_plan_id FROM study_plans WHERE study_plan_id = ?
            UNION
            SELECT sp.study_plan_id
            FROM study_plans sp
            JOIN plan_tree pt ON sp.master_study_plan_id = pt.id
        )
        SELECT id FROM plan_tree
        "#,
    )
    .bind(root_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

/// Soft-delete the given plans. Returns the number of rows newly deleted.
pub async fn soft_delete_plans(
    conn: &mut SqliteConnection,
    plan_ids: &[String],
    now: DateTime<Utc>,
) -> Result<u64> {
    if plan_ids.is_empty() {
        return Ok(0);
    }
    let placeholders = vec!["?"; plan_ids.len()].join(", ");
    let query = format!(
        "UPDATE study_plans SET deleted_at = ?, updated_at = ?
         WHERE deleted_at IS NULL AND study_plan_id IN ({placeholders})"
    );
    let mut q = sqlx::query(&query).bind(fmt_ts(now)).bind(fmt_ts(now));
    for id in plan_ids {
        q = q.bind(id);
    }
    Ok(q.execute(&mut *conn).await?.rows_affected())
}

/// Study plans visible to a student, newest plan id first, keyset paginated
/// by `study_plan_id < before_id`.
pub async fn list_plans_for_student(
    pool: &SqlitePool,
    student_id: &str,
    course_id: Option<&str>,
    before_id: Option<&str>,
    limit: u32,
) -> Result<Vec<StudyPlan>> {
    let query = format!(
        "SELECT i.{} FROM study_plans i
         INNER JOIN student_study_plans s ON i.study_plan_id = s.study_plan_id
         WHERE s.student_id = ?1
           AND (?2 IS NULL OR i.course_id = ?2)
           AND (?3 IS NULL OR i.study_plan_id < ?3)
           AND i.deleted_at IS NULL
           AND s.deleted_at IS NULL
         ORDER BY i.study_plan_id DESC
         LIMIT ?4",
        PLAN_COLUMNS.replace(", ", ", i.")
    );
    let rows = sqlx::query(&query)
        .bind(student_id)
        .bind(course_id)
        .bind(before_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(plan_from_row).collect()
}
