//! Study-plan monitor row queries
//!
//! Monitor rows record detected drift, one per missing combination,
//! idempotent on the natural key so repeated scans never duplicate alerts.

use chrono::{DateTime, Utc};
use lms_common::db::{MonitorKind, MonitorPayload, StudyPlanMonitor};
use lms_common::time::{fmt_ts, parse_ts, parse_ts_opt};
use lms_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection, SqlitePool};

const MONITOR_COLUMNS: &str = "study_plan_monitor_id, monitor_type, natural_key, student_id, \
     course_id, study_plan_id, payload, auto_upserted_at, created_at, updated_at, deleted_at";

fn monitor_from_row(row: &SqliteRow) -> Result<StudyPlanMonitor> {
    let kind: String = row.get("monitor_type");
    let payload: String = row.get("payload");
    Ok(StudyPlanMonitor {
        study_plan_monitor_id: row.get("study_plan_monitor_id"),
        monitor_type: MonitorKind::from_str(&kind)
            .ok_or_else(|| Error::Internal(format!("bad monitor type {kind:?}")))?,
        natural_key: row.get("natural_key"),
        student_id: row.get("student_id"),
        course_id: row.get("course_id"),
        study_plan_id: row.get("study_plan_id"),
        payload: serde_json::from_str(&payload)?,
        auto_upserted_at: parse_ts_opt(row.get("auto_upserted_at"))?,
        created_at: parse_ts(row.get::<&str, _>("created_at"))?,
        updated_at: parse_ts(row.get::<&str, _>("updated_at"))?,
        deleted_at: parse_ts_opt(row.get("deleted_at"))?,
    })
}

/// Record one drift occurrence. Re-detection of the same natural key only
/// bumps `updated_at` and revives a soft-deleted row; it never resets
/// `auto_upserted_at` or duplicates the alert.
pub async fn upsert_monitor(
    conn: &mut SqliteConnection,
    monitor: &StudyPlanMonitor,
) -> Result<()> {
    let payload = serde_json::to_string(&monitor.payload)?;
    sqlx::query(
        r#"
        INSERT INTO study_plan_monitors (
            study_plan_monitor_id, monitor_type, natural_key, student_id,
            course_id, study_plan_id, payload, auto_upserted_at,
            created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?, ?, NULL)
        ON CONFLICT(natural_key) DO UPDATE SET
            payload = excluded.payload,
            updated_at = excluded.updated_at,
            deleted_at = NULL
        "#,
    )
    .bind(&monitor.study_plan_monitor_id)
    .bind(monitor.monitor_type.as_str())
    .bind(&monitor.natural_key)
    .bind(&monitor.student_id)
    .bind(&monitor.course_id)
    .bind(&monitor.study_plan_id)
    .bind(payload)
    .bind(fmt_ts(monitor.created_at))
    .bind(fmt_ts(monitor.updated_at))
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Live, not-yet-repaired monitors of a kind, oldest first
pub async fn live_unrepaired_monitors(
    pool: &SqlitePool,
    kind: MonitorKind,
    limit: u32,
) -> Result<Vec<StudyPlanMonitor>> {
    let query = format!(
        "SELECT {MONITOR_COLUMNS} FROM study_plan_monitors
         WHERE monitor_type = ? AND deleted_at IS NULL AND auto_upserted_at IS NULL
         ORDER BY created_at ASC, study_plan_monitor_id ASC
         LIMIT ?"
    );
    let rows = sqlx::query(&query)
        .bind(kind.as_str())
        .bind(limit)
        .fetch_all(pool)
        .await?;

    rows.iter().map(monitor_from_row).collect()
}

/// Stamp a monitor row as auto-repaired
pub async fn mark_auto_upserted(
    conn: &mut SqliteConnection,
    study_plan_monitor_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE study_plan_monitors SET auto_upserted_at = ?, updated_at = ?
         WHERE study_plan_monitor_id = ?",
    )
    .bind(fmt_ts(now))
    .bind(fmt_ts(now))
    .bind(study_plan_monitor_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Soft-delete un-repaired student-study-plan monitors whose drift has
/// resolved (the copy now exists, or the enrollment itself went away).
/// Returns the number cleared.
pub async fn clear_resolved_student_plan_monitors(
    conn: &mut SqliteConnection,
    now: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE study_plan_monitors SET deleted_at = ?, updated_at = ?
        WHERE deleted_at IS NULL
          AND auto_upserted_at IS NULL
          AND monitor_type = 'STUDENT_STUDY_PLAN'
          AND (
            EXISTS (
                SELECT 1 FROM student_study_plans ssp
                WHERE ssp.student_id = study_plan_monitors.student_id
                  AND ssp.master_study_plan_id = study_plan_monitors.study_plan_id
                  AND ssp.deleted_at IS NULL
            )
            OR NOT EXISTS (
                SELECT 1 FROM course_students cs
                WHERE cs.student_id = study_plan_monitors.student_id
                  AND cs.course_id = study_plan_monitors.course_id
                  AND cs.deleted_at IS NULL
            )
          )
        "#,
    )
    .bind(fmt_ts(now))
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

/// Build a monitor row for a student missing a plan copy.
/// `study_plan_id` carries the master the copy should derive from.
pub fn missing_student_plan_monitor(
    student_id: &str,
    course_id: &str,
    master_study_plan_id: &str,
    now: DateTime<Utc>,
) -> StudyPlanMonitor {
    StudyPlanMonitor {
        study_plan_monitor_id: uuid::Uuid::new_v4().to_string(),
        monitor_type: MonitorKind::StudentStudyPlan,
        natural_key: format!("student_study_plan::{student_id}::{master_study_plan_id}"),
        student_id: Some(student_id.to_string()),
        course_id: Some(course_id.to_string()),
        study_plan_id: Some(master_study_plan_id.to_string()),
        payload: MonitorPayload {
            study_plan_id: None,
            master_study_plan_id: Some(master_study_plan_id.to_string()),
            master_item_id: None,
            content_structure: None,
            display_order: None,
        },
        auto_upserted_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

/// Build a monitor row for a copy plan missing a master item
pub fn missing_item_monitor(
    student_id: Option<&str>,
    course_id: &str,
    copy_plan_id: &str,
    master_study_plan_id: &str,
    master_item_id: &str,
    flatten: &str,
    payload: MonitorPayload,
    now: DateTime<Utc>,
) -> StudyPlanMonitor {
    StudyPlanMonitor {
        study_plan_monitor_id: uuid::Uuid::new_v4().to_string(),
        monitor_type: MonitorKind::StudyPlanItem,
        natural_key: format!("study_plan_item::{copy_plan_id}::{flatten}"),
        student_id: student_id.map(str::to_string),
        course_id: Some(course_id.to_string()),
        study_plan_id: Some(copy_plan_id.to_string()),
        payload: MonitorPayload {
            master_study_plan_id: Some(master_study_plan_id.to_string()),
            master_item_id: Some(master_item_id.to_string()),
            ..payload
        },
        auto_upserted_at: None,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}
