//! Integration tests for the consistency monitor: drift detection,
//! idempotent recording, re-verify, and per-item auto-repair.

use chrono::{DateTime, Duration, TimeZone, Utc};
use lms_common::db::{
    create_schema, ContentRef, ContentStructure, MonitorKind, MonitorPayload, PlanType,
    StoredStatus, StudyPlan,
};
use lms_sync::db::{memberships, monitors, study_plan_items, study_plans};
use lms_sync::monitor;
use lms_sync::replicator;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    create_schema(&pool).await.expect("schema");
    pool
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 5, 1, 9, 0, 0).unwrap()
}

fn lo_content(n: usize) -> ContentStructure {
    ContentStructure {
        course_id: "c1".to_string(),
        book_id: "b1".to_string(),
        chapter_id: "ch1".to_string(),
        topic_id: "t1".to_string(),
        item: ContentRef::LearningObjective {
            lo_id: format!("lo{n}"),
        },
    }
}

async fn seed_master(pool: &SqlitePool, plan_id: &str, n_items: usize) {
    let now = t0();
    let mut conn = pool.acquire().await.unwrap();
    study_plans::insert_plan(
        &mut *conn,
        &StudyPlan {
            study_plan_id: plan_id.to_string(),
            master_study_plan_id: None,
            course_id: "c1".to_string(),
            book_id: "b1".to_string(),
            school_id: None,
            name: None,
            status: StoredStatus::Active,
            plan_type: PlanType::Course,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        },
    )
    .await
    .unwrap();
    drop(conn);

    for n in 1..=n_items {
        add_master_item(pool, plan_id, n).await;
    }
}

async fn add_master_item(pool: &SqlitePool, plan_id: &str, n: usize) {
    let now = t0();
    let mut conn = pool.acquire().await.unwrap();
    let mut item = study_plan_items::new_item(plan_id, lo_content(n), n as i64, now);
    item.available_from = Some(now - Duration::days(1));
    item.start_date = Some(now + Duration::days(1));
    item.end_date = Some(now + Duration::days(8));
    study_plan_items::insert_item(&mut *conn, &item).await.unwrap();
}

async fn item_count(pool: &SqlitePool, plan_id: &str) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM study_plan_items WHERE study_plan_id = ? AND deleted_at IS NULL",
    )
    .bind(plan_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn monitor_rows(pool: &SqlitePool, kind: MonitorKind) -> Vec<(String, Option<String>)> {
    sqlx::query_as(
        "SELECT natural_key, auto_upserted_at FROM study_plan_monitors
         WHERE monitor_type = ? AND deleted_at IS NULL
         ORDER BY natural_key",
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn late_added_item_is_detected_once_per_copy_and_repaired() {
    let pool = setup_pool().await;
    seed_master(&pool, "sp1", 3).await;

    let copy_a = replicator::clone_for_student(&pool, None, "sp1", "stuA", t0())
        .await
        .unwrap();
    let copy_b = replicator::clone_for_student(&pool, None, "sp1", "stuB", t0())
        .await
        .unwrap();

    // Curriculum grows after the copies were cloned
    add_master_item(&pool, "sp1", 4).await;

    let report = monitor::run_scan(&pool, t0() + Duration::minutes(15), 100)
        .await
        .unwrap();
    assert_eq!(report.missing_items, 2); // one per student copy
    assert_eq!(report.repaired, 2);
    assert_eq!(report.repair_failures, 0);

    assert_eq!(item_count(&pool, &copy_a.study_plan_id).await, 4);
    assert_eq!(item_count(&pool, &copy_b.study_plan_id).await, 4);

    // Both monitor rows stamped; repaired rows link back to the master item
    let rows = monitor_rows(&pool, MonitorKind::StudyPlanItem).await;
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|(_, stamped)| stamped.is_some()));

    let linked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM study_plan_items
         WHERE deleted_at IS NULL AND copy_study_plan_item_id IS NOT NULL
           AND content_structure_flatten LIKE '%lo::lo4'",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(linked, 2);

    // A second pass finds nothing new and leaves the two rows alone
    let second = monitor::run_scan(&pool, t0() + Duration::minutes(30), 100)
        .await
        .unwrap();
    assert_eq!(second.missing_items, 0);
    assert_eq!(second.repaired, 0);
    assert_eq!(monitor_rows(&pool, MonitorKind::StudyPlanItem).await.len(), 2);
}

#[tokio::test]
async fn missing_student_plan_is_recorded_not_repaired() {
    let pool = setup_pool().await;
    seed_master(&pool, "sp1", 2).await;

    // Enrollment landed but replication never happened
    {
        let mut conn = pool.acquire().await.unwrap();
        memberships::upsert_course_student(&mut *conn, "stuA", "c1", 1, t0())
            .await
            .unwrap();
    }

    let report = monitor::run_scan(&pool, t0(), 100).await.unwrap();
    assert_eq!(report.missing_plans, 1);

    let rows = monitor_rows(&pool, MonitorKind::StudentStudyPlan).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].0, "student_study_plan::stuA::sp1");
    // Student-plan drift is alert-only; the copy is not auto-created
    assert!(rows[0].1.is_none());
    let copies: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM student_study_plans WHERE student_id = 'stuA' AND deleted_at IS NULL",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(copies, 0);

    // Repeated scans re-confirm the same natural key without duplicating
    monitor::run_scan(&pool, t0() + Duration::minutes(15), 100)
        .await
        .unwrap();
    assert_eq!(monitor_rows(&pool, MonitorKind::StudentStudyPlan).await.len(), 1);
}

#[tokio::test]
async fn reverify_clears_monitors_once_the_drift_resolves() {
    let pool = setup_pool().await;
    seed_master(&pool, "sp1", 2).await;
    {
        let mut conn = pool.acquire().await.unwrap();
        memberships::upsert_course_student(&mut *conn, "stuA", "c1", 1, t0())
            .await
            .unwrap();
    }

    monitor::run_scan(&pool, t0(), 100).await.unwrap();
    assert_eq!(monitor_rows(&pool, MonitorKind::StudentStudyPlan).await.len(), 1);

    // Replication catches up out of band
    replicator::clone_for_student(&pool, None, "sp1", "stuA", t0())
        .await
        .unwrap();

    let report = monitor::run_scan(&pool, t0() + Duration::minutes(15), 100)
        .await
        .unwrap();
    assert_eq!(report.cleared, 1);
    assert_eq!(report.missing_plans, 0);
    assert!(monitor_rows(&pool, MonitorKind::StudentStudyPlan).await.is_empty());
}

#[tokio::test]
async fn one_failed_repair_does_not_block_the_others() {
    let pool = setup_pool().await;
    seed_master(&pool, "sp1", 1).await;
    let copy = replicator::clone_for_student(&pool, None, "sp1", "stuA", t0())
        .await
        .unwrap();
    add_master_item(&pool, "sp1", 2).await;

    // A poisoned monitor row pointing at a master item that no longer exists
    {
        let mut conn = pool.acquire().await.unwrap();
        let poisoned = monitors::missing_item_monitor(
            Some("stuA"),
            "c1",
            &copy.study_plan_id,
            "sp1",
            "no-such-item",
            "book::b1topic::t1chapter::ch1course::c1lo::ghost",
            MonitorPayload {
                study_plan_id: Some(copy.study_plan_id.clone()),
                master_study_plan_id: None,
                master_item_id: None,
                content_structure: None,
                display_order: None,
            },
            t0(),
        );
        monitors::upsert_monitor(&mut *conn, &poisoned).await.unwrap();
    }

    let report = monitor::run_scan(&pool, t0() + Duration::minutes(15), 100)
        .await
        .unwrap();
    // The real missing item is repaired despite the poisoned row failing
    assert_eq!(report.repaired, 1);
    assert_eq!(report.repair_failures, 1);
    assert_eq!(item_count(&pool, &copy.study_plan_id).await, 2);

    // The failed row stays un-stamped for the next pass
    let rows = monitor_rows(&pool, MonitorKind::StudyPlanItem).await;
    let unstamped: Vec<_> = rows.iter().filter(|(_, s)| s.is_none()).collect();
    assert_eq!(unstamped.len(), 1);
    assert!(unstamped[0].0.contains("ghost"));
}
