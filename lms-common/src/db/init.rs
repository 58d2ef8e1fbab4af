//! Database initialization
//!
//! Creates the connection pool and the full schema on first run. Schema
//! creation is idempotent (`CREATE TABLE IF NOT EXISTS`) and safe to call
//! on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer; replication, the event
    // consumer, and the monitor all share this pool.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    // Writers wait instead of failing immediately under contention
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables and indexes. Idempotent; also used by tests against
/// in-memory pools.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_study_plans_table(pool).await?;
    create_study_plan_items_table(pool).await?;
    create_student_study_plans_table(pool).await?;
    create_course_study_plans_table(pool).await?;
    create_course_students_table(pool).await?;
    create_course_student_access_paths_table(pool).await?;
    create_chapters_table(pool).await?;
    create_topics_table(pool).await?;
    create_study_plan_monitors_table(pool).await?;
    create_submission_tables(pool).await?;
    Ok(())
}

async fn create_study_plans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS study_plans (
            study_plan_id TEXT PRIMARY KEY,
            master_study_plan_id TEXT REFERENCES study_plans(study_plan_id),
            course_id TEXT NOT NULL,
            book_id TEXT NOT NULL,
            school_id INTEGER,
            name TEXT,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            plan_type TEXT NOT NULL DEFAULT 'COURSE',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS study_plans_master_idx
         ON study_plans(master_study_plan_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS study_plans_course_idx
         ON study_plans(course_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_study_plan_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS study_plan_items (
            study_plan_item_id TEXT PRIMARY KEY,
            study_plan_id TEXT NOT NULL REFERENCES study_plans(study_plan_id),
            copy_study_plan_item_id TEXT,
            content_structure TEXT NOT NULL,
            content_structure_flatten TEXT NOT NULL,
            available_from TEXT,
            available_to TEXT,
            start_date TEXT,
            end_date TEXT,
            completed_at TEXT,
            school_date TEXT,
            display_order INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL DEFAULT 'ACTIVE',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            UNIQUE(study_plan_id, content_structure_flatten)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS study_plan_items_plan_idx
         ON study_plan_items(study_plan_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_student_study_plans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS student_study_plans (
            study_plan_id TEXT NOT NULL REFERENCES study_plans(study_plan_id),
            student_id TEXT NOT NULL,
            master_study_plan_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY (study_plan_id, student_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Idempotent-clone key: at most one live copy per (master, student).
    // Soft-deleted rows stay behind for audit, so the index is partial.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS student_study_plans_master_student_un
         ON student_study_plans(master_study_plan_id, student_id)
         WHERE deleted_at IS NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS student_study_plans_student_idx
         ON student_study_plans(student_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_course_study_plans_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS course_study_plans (
            course_id TEXT NOT NULL,
            study_plan_id TEXT NOT NULL REFERENCES study_plans(study_plan_id),
            master_study_plan_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY (course_id, study_plan_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS course_study_plans_master_course_un
         ON course_study_plans(master_study_plan_id, course_id)
         WHERE deleted_at IS NULL",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_course_students_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS course_students (
            course_student_id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            last_event_seq INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            UNIQUE(student_id, course_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_course_student_access_paths_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS course_student_access_paths (
            course_student_id TEXT NOT NULL REFERENCES course_students(course_student_id),
            location_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY (course_student_id, location_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_chapters_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            chapter_id TEXT PRIMARY KEY,
            book_id TEXT NOT NULL,
            name TEXT,
            current_topic_display_order INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_topics_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topics (
            topic_id TEXT PRIMARY KEY,
            chapter_id TEXT NOT NULL REFERENCES chapters(chapter_id),
            name TEXT,
            display_order INTEGER NOT NULL DEFAULT 0,
            current_lm_display_order INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_study_plan_monitors_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS study_plan_monitors (
            study_plan_monitor_id TEXT PRIMARY KEY,
            monitor_type TEXT NOT NULL,
            natural_key TEXT NOT NULL UNIQUE,
            student_id TEXT,
            course_id TEXT,
            study_plan_id TEXT,
            payload TEXT NOT NULL,
            auto_upserted_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS study_plan_monitors_type_idx
         ON study_plan_monitors(monitor_type)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_submission_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS student_submissions (
            student_submission_id TEXT PRIMARY KEY,
            study_plan_item_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            content TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS student_submissions_item_idx
         ON student_submissions(study_plan_item_id, student_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS student_submission_grades (
            student_submission_grade_id TEXT PRIMARY KEY,
            student_submission_id TEXT NOT NULL REFERENCES student_submissions(student_submission_id),
            grade REAL NOT NULL,
            grader_id TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
