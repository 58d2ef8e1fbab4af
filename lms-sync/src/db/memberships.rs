//! Membership queries: course students, location access paths, and the
//! join rows binding study-plan copies to students and courses.
//!
//! Membership rows are soft-deleted and revived in place so the
//! `(student_id, course_id)` key (and its `last_event_seq`) survives
//! enrollment churn.

use chrono::{DateTime, Utc};
use lms_common::db::{CourseStudent, CourseStudyPlan, StudentStudyPlan};
use lms_common::time::{fmt_ts, parse_ts, parse_ts_opt};
use lms_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};
use uuid::Uuid;

fn course_student_from_row(row: &SqliteRow) -> Result<CourseStudent> {
    Ok(CourseStudent {
        course_student_id: row.get("course_student_id"),
        student_id: row.get("student_id"),
        course_id: row.get("course_id"),
        last_event_seq: row.get("last_event_seq"),
        created_at: parse_ts(row.get::<&str, _>("created_at"))?,
        updated_at: parse_ts(row.get::<&str, _>("updated_at"))?,
        deleted_at: parse_ts_opt(row.get("deleted_at"))?,
    })
}

/// Fetch a membership row regardless of deletion state (the sequence check
/// must see soft-deleted rows too)
pub async fn get_course_student(
    conn: &mut SqliteConnection,
    student_id: &str,
    course_id: &str,
) -> Result<Option<CourseStudent>> {
    let row = sqlx::query(
        "SELECT course_student_id, student_id, course_id, last_event_seq,
                created_at, updated_at, deleted_at
         FROM course_students
         WHERE student_id = ? AND course_id = ?",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.as_ref().map(course_student_from_row).transpose()
}

/// Insert or revive a membership, recording the applied event sequence.
/// Returns the membership id.
pub async fn upsert_course_student(
    conn: &mut SqliteConnection,
    student_id: &str,
    course_id: &str,
    event_seq: i64,
    now: DateTime<Utc>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO course_students (
            course_student_id, student_id, course_id, last_event_seq,
            created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, ?, NULL)
        ON CONFLICT(student_id, course_id) DO UPDATE SET
            last_event_seq = excluded.last_event_seq,
            updated_at = excluded.updated_at,
            deleted_at = NULL
        "#,
    )
    .bind(&id)
    .bind(student_id)
    .bind(course_id)
    .bind(event_seq)
    .bind(fmt_ts(now))
    .bind(fmt_ts(now))
    .execute(&mut *conn)
    .await?;

    // The upsert may have kept the existing id; read it back
    let course_student_id: String = sqlx::query_scalar(
        "SELECT course_student_id FROM course_students
         WHERE student_id = ? AND course_id = ?",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(course_student_id)
}

/// Soft-delete a membership, still advancing its event sequence so later
/// stale upserts are rejected
pub async fn soft_delete_course_student(
    conn: &mut SqliteConnection,
    student_id: &str,
    course_id: &str,
    event_seq: i64,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE course_students
         SET deleted_at = ?, updated_at = ?, last_event_seq = ?
         WHERE student_id = ? AND course_id = ?",
    )
    .bind(fmt_ts(now))
    .bind(fmt_ts(now))
    .bind(event_seq)
    .bind(student_id)
    .bind(course_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Live location ids for a membership
pub async fn live_access_paths(
    conn: &mut SqliteConnection,
    course_student_id: &str,
) -> Result<Vec<String>> {
    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT location_id FROM course_student_access_paths
         WHERE course_student_id = ? AND deleted_at IS NULL
         ORDER BY location_id",
    )
    .bind(course_student_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(ids)
}

/// Reconcile a membership's access paths against the event's location set:
/// upsert every named location, soft-delete live ones no longer named.
/// Multiple live paths may coexist; only stale ones are removed.
pub async fn reconcile_access_paths(
    conn: &mut SqliteConnection,
    course_student_id: &str,
    location_ids: &[String],
    now: DateTime<Utc>,
) -> Result<()> {
    for location_id in location_ids {
        sqlx::query(
            r#"
            INSERT INTO course_student_access_paths (
                course_student_id, location_id, created_at, updated_at, deleted_at
            ) VALUES (?, ?, ?, ?, NULL)
            ON CONFLICT(course_student_id, location_id) DO UPDATE SET
                updated_at = excluded.updated_at,
                deleted_at = NULL
            "#,
        )
        .bind(course_student_id)
        .bind(location_id)
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .execute(&mut *conn)
        .await?;
    }

    let mut query = String::from(
        "UPDATE course_student_access_paths SET deleted_at = ?, updated_at = ?
         WHERE course_student_id = ? AND deleted_at IS NULL",
    );
    if !location_ids.is_empty() {
        let placeholders = vec!["?"; location_ids.len()].join(", ");
        query.push_str(&format!(" AND location_id NOT IN ({placeholders})"));
    }
    let mut q = sqlx::query(&query)
        .bind(fmt_ts(now))
        .bind(fmt_ts(now))
        .bind(course_student_id);
    for location_id in location_ids {
        q = q.bind(location_id);
    }
    q.execute(&mut *conn).await?;

    Ok(())
}

/// Soft-delete every access path of a membership
pub async fn soft_delete_access_paths(
    conn: &mut SqliteConnection,
    course_student_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE course_student_access_paths SET deleted_at = ?, updated_at = ?
         WHERE course_student_id = ? AND deleted_at IS NULL",
    )
    .bind(fmt_ts(now))
    .bind(fmt_ts(now))
    .bind(course_student_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// The live copy of `master_study_plan_id` held by a student, if any:
/// the idempotent-clone existence check
pub async fn find_live_student_plan(
    conn: &mut SqliteConnection,
    master_study_plan_id: &str,
    student_id: &str,
) -> Result<Option<String>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT study_plan_id FROM student_study_plans
         WHERE master_study_plan_id = ? AND student_id = ? AND deleted_at IS NULL",
    )
    .bind(master_study_plan_id)
    .bind(student_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(id)
}

/// Bind a copy plan to a student. A racing duplicate trips the partial
/// unique index and surfaces as `Conflict`; replays are expected to have
/// been filtered by [`find_live_student_plan`] first.
pub async fn insert_student_study_plan(
    conn: &mut SqliteConnection,
    ssp: &StudentStudyPlan,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO student_study_plans (
            study_plan_id, student_id, master_study_plan_id,
            created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(&ssp.study_plan_id)
    .bind(&ssp.student_id)
    .bind(&ssp.master_study_plan_id)
    .bind(fmt_ts(ssp.created_at))
    .bind(fmt_ts(ssp.updated_at))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if Error::is_unique_violation(&e) => Err(Error::Conflict(format!(
            "student study plan already exists for master {:?} student {}",
            ssp.master_study_plan_id, ssp.student_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Bind a copy plan to a course, same conflict semantics as the student join
pub async fn insert_course_study_plan(
    conn: &mut SqliteConnection,
    csp: &CourseStudyPlan,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        INSERT INTO course_study_plans (
            course_id, study_plan_id, master_study_plan_id,
            created_at, updated_at, deleted_at
        ) VALUES (?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(&csp.course_id)
    .bind(&csp.study_plan_id)
    .bind(&csp.master_study_plan_id)
    .bind(fmt_ts(csp.created_at))
    .bind(fmt_ts(csp.updated_at))
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(e) if Error::is_unique_violation(&e) => Err(Error::Conflict(format!(
            "course study plan already exists for master {:?} course {}",
            csp.master_study_plan_id, csp.course_id
        ))),
        Err(e) => Err(e.into()),
    }
}

/// The live course-scoped copy of a master, if any
pub async fn find_live_course_plan(
    conn: &mut SqliteConnection,
    master_study_plan_id: &str,
    course_id: &str,
) -> Result<Option<String>> {
    let id: Option<String> = sqlx::query_scalar(
        "SELECT study_plan_id FROM course_study_plans
         WHERE master_study_plan_id = ? AND course_id = ? AND deleted_at IS NULL",
    )
    .bind(master_study_plan_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(id)
}

/// Soft-delete membership join rows referencing the given plans
pub async fn soft_delete_plan_memberships(
    conn: &mut SqliteConnection,
    plan_ids: &[String],
    now: DateTime<Utc>,
) -> Result<()> {
    if plan_ids.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; plan_ids.len()].join(", ");

    for table in ["student_study_plans", "course_study_plans"] {
        let query = format!(
            "UPDATE {table} SET deleted_at = ?, updated_at = ?
             WHERE deleted_at IS NULL AND study_plan_id IN ({placeholders})"
        );
        let mut q = sqlx::query(&query).bind(fmt_ts(now)).bind(fmt_ts(now));
        for id in plan_ids {
            q = q.bind(id);
        }
        q.execute(&mut *conn).await?;
    }

    Ok(())
}

/// Study-plan copy ids a student holds for the given courses (never masters)
pub async fn student_copy_plans_for_courses(
    conn: &mut SqliteConnection,
    student_id: &str,
    course_ids: &[String],
) -> Result<Vec<String>> {
    if course_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; course_ids.len()].join(", ");
    let query = format!(
        "SELECT ssp.study_plan_id
         FROM student_study_plans ssp
         JOIN study_plans sp ON sp.study_plan_id = ssp.study_plan_id
         WHERE ssp.student_id = ?
           AND ssp.deleted_at IS NULL
           AND sp.master_study_plan_id IS NOT NULL
           AND sp.course_id IN ({placeholders})"
    );
    let mut q = sqlx::query_scalar(&query).bind(student_id);
    for id in course_ids {
        q = q.bind(id);
    }
    let ids: Vec<String> = q.fetch_all(&mut *conn).await?;
    Ok(ids)
}
