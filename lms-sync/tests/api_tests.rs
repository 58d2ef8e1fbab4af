//! Integration tests for the lms-sync API endpoints
//!
//! Tests cover:
//! - Health endpoint
//! - Classified item listings with status filter and ordering
//! - Time-window edits and their invariant errors
//! - Bulk stored-status updates
//! - Enrollment event ingestion through the consumer loop

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Duration, TimeZone, Utc};
use lms_common::db::{
    create_schema, ContentRef, ContentStructure, PlanType, StoredStatus, StudyPlan,
};
use lms_common::events::EventBus;
use lms_common::time::now_utc;
use lms_sync::db::{study_plan_items, study_plans};
use lms_sync::{build_router, enrollment, replicator, AppState};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::util::ServiceExt; // for `oneshot` method

async fn setup_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    create_schema(&pool).await.expect("schema");
    pool
}

/// Test helper: app with a live consumer loop behind the ingestion endpoint
fn setup_app(pool: SqlitePool) -> axum::Router {
    let bus = Arc::new(EventBus::default());
    let (events_tx, events_rx) = mpsc::channel(64);
    enrollment::spawn_consumer(pool.clone(), bus.clone(), events_rx);
    build_router(AppState::new(pool, bus, events_tx))
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

fn past(hours: i64) -> DateTime<Utc> {
    now_utc() - Duration::hours(hours)
}

fn future(hours: i64) -> DateTime<Utc> {
    now_utc() + Duration::hours(hours)
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

/// Seed a master with one item per lifecycle bucket, then clone for `stuA`.
/// Returns the copy plan id.
async fn seed_classified_plan(pool: &SqlitePool) -> String {
    let now = now_utc();
    let mut conn = pool.acquire().await.unwrap();
    study_plans::insert_plan(
        &mut *conn,
        &StudyPlan {
            study_plan_id: "sp1".to_string(),
            master_study_plan_id: None,
            course_id: "c1".to_string(),
            book_id: "b1".to_string(),
            school_id: None,
            name: Some("Term plan".to_string()),
            status: StoredStatus::Active,
            plan_type: PlanType::Course,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        },
    )
    .await
    .unwrap();

    // (display_order, start, end, completed)
    let specs: [(i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>, Option<DateTime<Utc>>); 4] = [
        (1, Some(past(2)), Some(future(2)), None),           // active
        (2, Some(future(24)), Some(future(48)), None),       // upcoming
        (3, Some(past(48)), Some(past(24)), None),           // overdue
        (4, Some(past(2)), Some(future(2)), Some(past(1))),  // completed
    ];
    for (order, start, end, completed) in specs {
        let mut item =
            study_plan_items::new_item("sp1", lo_content(order as usize), order, now);
        item.available_from = Some(past(72));
        item.start_date = start;
        item.end_date = end;
        item.completed_at = completed;
        study_plan_items::insert_item(&mut *conn, &item).await.unwrap();
    }
    drop(conn);

    let outcome = replicator::clone_for_student(pool, None, "sp1", "stuA", now)
        .await
        .unwrap();

    // Completion is per student, set on the copy
    let copy_items = {
        let mut conn = pool.acquire().await.unwrap();
        study_plan_items::live_items_for_plan(&mut *conn, &outcome.study_plan_id)
            .await
            .unwrap()
    };
    let completed = copy_items.iter().find(|i| i.display_order == 4).unwrap();
    study_plan_items::set_completed_at(
        pool,
        &completed.study_plan_item_id,
        Some(past(1)),
        now,
    )
    .await
    .unwrap();

    outcome.study_plan_id
}

#[tokio::test]
async fn health_endpoint_reports_module() {
    let pool = setup_pool().await;
    let app = setup_app(pool);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "lms-sync");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn item_listing_classifies_and_filters_by_status() {
    let pool = setup_pool().await;
    seed_classified_plan(&pool).await;
    let app = setup_app(pool);

    let response = app
        .clone()
        .oneshot(get("/api/students/stuA/study-plan-items"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    let statuses: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["status"].as_str().unwrap())
        .collect();
    // Master items are invisible to the student listing; only the copy shows.
    // Buckets come current-first.
    assert_eq!(statuses, ["active", "upcoming", "overdue", "completed"]);

    let response = app
        .clone()
        .oneshot(get("/api/students/stuA/study-plan-items?status=active"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["status"], "active");
    assert_eq!(body[0]["display_order"], 1);

    let response = app
        .oneshot(get("/api/students/stuA/study-plan-items?status=bogus"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn listing_is_scoped_to_the_requested_student() {
    let pool = setup_pool().await;
    seed_classified_plan(&pool).await;
    let app = setup_app(pool);

    let response = app
        .oneshot(get("/api/students/stuB/study-plan-items"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn time_window_edit_enforces_the_ordering_invariant() {
    let pool = setup_pool().await;
    let copy_id = seed_classified_plan(&pool).await;
    let item_id = {
        let mut conn = pool.acquire().await.unwrap();
        let items = study_plan_items::live_items_for_plan(&mut *conn, &copy_id)
            .await
            .unwrap();
        items[0].study_plan_item_id.clone()
    };
    let app = setup_app(pool);

    // end before start is rejected with a structured error
    let response = app
        .clone()
        .oneshot(with_json(
            "PATCH",
            &format!("/api/study-plan-items/{item_id}/time-window"),
            json!({
                "update_type": "both",
                "start_date": future(10),
                "end_date": future(5),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("invalid time window"));

    // start before the availability window is rejected too
    let response = app
        .clone()
        .oneshot(with_json(
            "PATCH",
            &format!("/api/study-plan-items/{item_id}/time-window"),
            json!({
                "update_type": "start_date",
                "start_date": past(100),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // A valid edit comes back reclassified
    let response = app
        .clone()
        .oneshot(with_json(
            "PATCH",
            &format!("/api/study-plan-items/{item_id}/time-window"),
            json!({
                "update_type": "both",
                "start_date": future(1),
                "end_date": future(6),
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "upcoming");

    // Unknown item is a 404
    let response = app
        .oneshot(with_json(
            "PATCH",
            "/api/study-plan-items/ghost/time-window",
            json!({ "update_type": "start_date", "start_date": future(1) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn archived_items_drop_out_of_listings() {
    let pool = setup_pool().await;
    let copy_id = seed_classified_plan(&pool).await;
    let item_id = {
        let mut conn = pool.acquire().await.unwrap();
        let items = study_plan_items::live_items_for_plan(&mut *conn, &copy_id)
            .await
            .unwrap();
        items[0].study_plan_item_id.clone()
    };
    let app = setup_app(pool);

    let response = app
        .clone()
        .oneshot(with_json(
            "POST",
            "/api/study-plan-items/status",
            json!({ "study_plan_item_ids": [item_id], "status": "ARCHIVED" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["updated"], 1);

    let response = app
        .oneshot(get("/api/students/stuA/study-plan-items"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn school_date_edit_round_trips() {
    let pool = setup_pool().await;
    let copy_id = seed_classified_plan(&pool).await;
    let item_id = {
        let mut conn = pool.acquire().await.unwrap();
        let items = study_plan_items::live_items_for_plan(&mut *conn, &copy_id)
            .await
            .unwrap();
        items[0].study_plan_item_id.clone()
    };
    let app = setup_app(pool.clone());

    let response = app
        .clone()
        .oneshot(with_json(
            "PATCH",
            &format!("/api/study-plan-items/{item_id}/school-date"),
            json!({ "school_date": future(24) }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut conn = pool.acquire().await.unwrap();
    let item = study_plan_items::get_live_item(&mut *conn, &item_id).await.unwrap();
    assert!(item.school_date.is_some());
    drop(conn);

    let response = app
        .oneshot(with_json(
            "PATCH",
            "/api/study-plan-items/ghost/school-date",
            json!({ "school_date": null }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ingested_enrollment_event_flows_through_the_consumer() {
    let pool = setup_pool().await;
    seed_classified_plan(&pool).await;
    let app = setup_app(pool.clone());

    let response = app
        .clone()
        .oneshot(with_json(
            "POST",
            "/api/enrollment-events",
            json!({
                "student_id": "stuB",
                "sequence": 1,
                "action": "UPSERTED",
                "packages": [{ "course_id": "c1", "location_ids": ["loc1"] }],
                "timestamp": "2026-05-01T09:00:00Z",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // The consumer applies asynchronously; poll until the copy appears
    let mut plans = Vec::new();
    for _ in 0..100 {
        plans = study_plans::list_plans_for_student(&pool, "stuB", None, None, 10)
            .await
            .unwrap();
        if !plans.is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(plans.len(), 1, "copy never appeared for stuB");
    assert_eq!(plans[0].master_study_plan_id.as_deref(), Some("sp1"));

    // Malformed events are rejected at the door
    let response = app
        .oneshot(with_json(
            "POST",
            "/api/enrollment-events",
            json!({
                "student_id": "",
                "sequence": 2,
                "action": "DELETED",
                "packages": [{ "course_id": "c1" }],
                "timestamp": "2026-05-01T09:00:00Z",
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn latest_submission_and_grade_win_over_http() {
    let pool = setup_pool().await;
    let copy_id = seed_classified_plan(&pool).await;
    let item_id = {
        let mut conn = pool.acquire().await.unwrap();
        let items = study_plan_items::live_items_for_plan(&mut *conn, &copy_id)
            .await
            .unwrap();
        items[0].study_plan_item_id.clone()
    };
    let app = setup_app(pool);

    let uri = format!("/api/study-plan-items/{item_id}/submissions");
    let first = app
        .clone()
        .oneshot(with_json(
            "POST",
            &uri,
            json!({ "student_id": "stuA", "content": "draft" }),
        ))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .clone()
        .oneshot(with_json(
            "POST",
            &uri,
            json!({ "student_id": "stuA", "content": "final answer" }),
        ))
        .await
        .unwrap();
    let second_id = extract_json(second.into_body()).await["student_submission_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .clone()
        .oneshot(get(&format!(
            "/api/study-plan-items/{item_id}/submissions/current?student_id=stuA"
        )))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["student_submission_id"], second_id.as_str());
    assert_eq!(body["content"], "final answer");

    // Grading attaches to the submission current at grading time
    let response = app
        .clone()
        .oneshot(with_json(
            "POST",
            &format!("/api/study-plan-items/{item_id}/grades"),
            json!({ "student_id": "stuA", "grade": 9.0, "grader_id": "teacher1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let graded = extract_json(response.into_body()).await;
    assert_eq!(graded["student_submission_id"], second_id.as_str());

    let response = app
        .oneshot(get(&format!(
            "/api/study-plan-items/{item_id}/grades/current?student_id=stuA"
        )))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["grade"], 9.0);
}

#[tokio::test]
async fn multi_student_listing_keys_items_by_student() {
    let pool = setup_pool().await;
    seed_classified_plan(&pool).await;
    replicator::clone_for_student(&pool, None, "sp1", "stuB", now_utc())
        .await
        .unwrap();
    let app = setup_app(pool);

    let response = app
        .clone()
        .oneshot(get("/api/study-plan-items?student_ids=stuA,stuB"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["stuA"].as_array().unwrap().len(), 4);
    // stuB's copy never had its 4th item completed, so it classifies active
    assert_eq!(body["stuB"].as_array().unwrap().len(), 4);

    let response = app
        .oneshot(get("/api/study-plan-items?student_ids="))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
