//! lms-sync library - Study Plan Sync service
//!
//! Keeps per-student materialized study-plan copies consistent with
//! curriculum content and asynchronous enrollment events: replication,
//! enrollment event consumption, drift monitoring, display-order
//! allocation, and the submission ledger.

use axum::Router;
use lms_common::events::{EventBus, StudentPackageEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;

pub mod allocator;
pub mod api;
pub mod config;
pub mod db;
pub mod enrollment;
pub mod ledger;
pub mod monitor;
pub mod replicator;

/// Application state shared across HTTP handlers and background tasks
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Broadcast bus for post-commit notifications
    pub bus: Arc<EventBus>,
    /// Ingestion queue feeding the enrollment consumer loop
    pub events_tx: mpsc::Sender<StudentPackageEvent>,
}

impl AppState {
    /// Create new application state
    pub fn new(
        db: SqlitePool,
        bus: Arc<EventBus>,
        events_tx: mpsc::Sender<StudentPackageEvent>,
    ) -> Self {
        Self { db, bus, events_tx }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, patch, post};

    Router::new()
        .route("/health", get(api::health::health))
        .route(
            "/api/students/:student_id/study-plans",
            get(api::plans::list_student_plans),
        )
        .route(
            "/api/students/:student_id/study-plan-items",
            get(api::items::list_student_items),
        )
        .route(
            "/api/study-plan-items",
            get(api::items::items_for_students),
        )
        .route(
            "/api/study-plan-items/:id/time-window",
            patch(api::items::set_time_window),
        )
        .route(
            "/api/study-plan-items/:id/school-date",
            patch(api::items::set_school_date),
        )
        .route(
            "/api/study-plan-items/status",
            post(api::items::bulk_set_status),
        )
        .route(
            "/api/study-plan-items/:id/submissions",
            post(api::submissions::submit),
        )
        .route(
            "/api/study-plan-items/:id/submissions/current",
            get(api::submissions::current_submission),
        )
        .route(
            "/api/study-plan-items/:id/grades",
            post(api::submissions::grade),
        )
        .route(
            "/api/study-plan-items/:id/grades/current",
            get(api::submissions::current_grade),
        )
        .route("/api/enrollment-events", post(api::events::ingest_event))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
