//! Submission ledger
//!
//! Student work and grades are append-only: submitting always inserts,
//! grading attaches a grade row to the submission current at grading time,
//! and "current" is always derived by recency, never stored redundantly.
//! The write amplification buys a complete, auditable history.

use lms_common::db::{StudentSubmission, StudentSubmissionGrade};
use lms_common::time::{fmt_ts, parse_ts};
use lms_common::{Error, Result};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use uuid::Uuid;

fn submission_from_row(row: &SqliteRow) -> Result<StudentSubmission> {
    Ok(StudentSubmission {
        student_submission_id: row.get("student_submission_id"),
        study_plan_item_id: row.get("study_plan_item_id"),
        student_id: row.get("student_id"),
        content: row.get("content"),
        created_at: parse_ts(row.get::<&str, _>("created_at"))?,
    })
}

fn grade_from_row(row: &SqliteRow) -> Result<StudentSubmissionGrade> {
    Ok(StudentSubmissionGrade {
        student_submission_grade_id: row.get("student_submission_grade_id"),
        student_submission_id: row.get("student_submission_id"),
        grade: row.get("grade"),
        grader_id: row.get("grader_id"),
        created_at: parse_ts(row.get::<&str, _>("created_at"))?,
    })
}

/// Record a submission. Always inserts a new row; prior submissions are
/// immutable.
pub async fn submit(
    pool: &SqlitePool,
    study_plan_item_id: &str,
    student_id: &str,
    content: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<String> {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO student_submissions (
            student_submission_id, study_plan_item_id, student_id, content, created_at
        ) VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(study_plan_item_id)
    .bind(student_id)
    .bind(content)
    .bind(fmt_ts(now))
    .execute(pool)
    .await?;

    Ok(id)
}

/// The submission the student currently "sees" for an item: latest by
/// `(created_at, student_submission_id)` descending
pub async fn current_submission(
    pool: &SqlitePool,
    study_plan_item_id: &str,
    student_id: &str,
) -> Result<Option<StudentSubmission>> {
    let row = sqlx::query(
        r#"
        SELECT student_submission_id, study_plan_item_id, student_id, content, created_at
        FROM student_submissions
        WHERE study_plan_item_id = ? AND student_id = ?
        ORDER BY created_at DESC, student_submission_id DESC
        LIMIT 1
        "#,
    )
    .bind(study_plan_item_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(submission_from_row).transpose()
}

/// Full submission history for an item, newest first
pub async fn list_submissions(
    pool: &SqlitePool,
    study_plan_item_id: &str,
    student_id: &str,
) -> Result<Vec<StudentSubmission>> {
    let rows = sqlx::query(
        r#"
        SELECT student_submission_id, study_plan_item_id, student_id, content, created_at
        FROM student_submissions
        WHERE study_plan_item_id = ? AND student_id = ?
        ORDER BY created_at DESC, student_submission_id DESC
        "#,
    )
    .bind(study_plan_item_id)
    .bind(student_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(submission_from_row).collect()
}

/// Grade the submission current at grading time for `(item, student)`.
/// Fails with `NotFound` when the student has not submitted.
pub async fn grade_current(
    pool: &SqlitePool,
    study_plan_item_id: &str,
    student_id: &str,
    grade: f64,
    grader_id: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<StudentSubmissionGrade> {
    let submission = current_submission(pool, study_plan_item_id, student_id)
        .await?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "no submission for item {study_plan_item_id} student {student_id}"
            ))
        })?;

    let row = StudentSubmissionGrade {
        student_submission_grade_id: Uuid::new_v4().to_string(),
        student_submission_id: submission.student_submission_id,
        grade,
        grader_id: grader_id.map(str::to_string),
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO student_submission_grades (
            student_submission_grade_id, student_submission_id, grade, grader_id, created_at
        ) VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.student_submission_grade_id)
    .bind(&row.student_submission_id)
    .bind(row.grade)
    .bind(&row.grader_id)
    .bind(fmt_ts(row.created_at))
    .execute(pool)
    .await?;

    Ok(row)
}

/// The current grade for an item: the same recency rule, over grade rows
/// joined through the item's submissions
pub async fn current_grade(
    pool: &SqlitePool,
    study_plan_item_id: &str,
    student_id: &str,
) -> Result<Option<StudentSubmissionGrade>> {
    let row = sqlx::query(
        r#"
        SELECT g.student_submission_grade_id, g.student_submission_id,
               g.grade, g.grader_id, g.created_at
        FROM student_submission_grades g
        JOIN student_submissions s ON s.student_submission_id = g.student_submission_id
        WHERE s.study_plan_item_id = ? AND s.student_id = ?
        ORDER BY g.created_at DESC, g.student_submission_grade_id DESC
        LIMIT 1
        "#,
    )
    .bind(study_plan_item_id)
    .bind(student_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(grade_from_row).transpose()
}
