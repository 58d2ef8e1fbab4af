//! Consistency monitor
//!
//! Periodically compares curriculum and enrollment state against the
//! per-student materialized copies and records drift as monitor rows.
//! Two independent drift classes:
//!
//! - a student enrolled in a course with no live copy of one of its master
//!   plans (replication failed or raced an enrollment);
//! - a learning item added to a master after copies were cloned, so the
//!   copies are missing it.
//!
//! Detection is read-only set-difference queries over a live store, so a
//! student enrolling mid-scan may be flagged and then self-resolve on the
//! next pass; that false positive is benign because recording and repair
//! are both idempotent. Item monitors are auto-repaired through the
//! replicator's insert path; student-plan monitors are recorded for
//! operators (redelivery owns that repair).

use crate::db::{monitors, study_plan_items};
use crate::replicator;
use chrono::{DateTime, Utc};
use lms_common::db::{MonitorKind, MonitorPayload};
use lms_common::events::{EventBus, SyncEvent};
use lms_common::Result;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Outcome of one monitor pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Newly recorded (or re-confirmed) missing student plan copies
    pub missing_plans: usize,
    /// Newly recorded (or re-confirmed) missing copy items
    pub missing_items: usize,
    /// Stale student-plan monitors cleared by the re-verify pass
    pub cleared: usize,
    /// Item monitors repaired this pass
    pub repaired: usize,
    /// Item monitors whose repair failed (left un-stamped for the next pass)
    pub repair_failures: usize,
}

/// Run one full scan: re-verify, detect both drift classes, then repair
/// item drift. Detection and repair are independent passes; a repair
/// failure for one item never blocks the others.
pub async fn run_scan(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    batch_size: u32,
) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    report.cleared = reverify_student_plan_monitors(pool, now).await?;
    report.missing_plans = detect_missing_student_plans(pool, now, batch_size).await?;
    report.missing_items = detect_missing_items(pool, now, batch_size).await?;

    let (repaired, failures) = repair_missing_items(pool, now, batch_size).await?;
    report.repaired = repaired;
    report.repair_failures = failures;

    info!(
        missing_plans = report.missing_plans,
        missing_items = report.missing_items,
        cleared = report.cleared,
        repaired = report.repaired,
        repair_failures = report.repair_failures,
        "consistency scan finished"
    );

    Ok(report)
}

/// Clear un-repaired student-plan monitors whose drift no longer exists
async fn reverify_student_plan_monitors(pool: &SqlitePool, now: DateTime<Utc>) -> Result<usize> {
    let mut conn = pool.acquire().await?;
    let cleared = monitors::clear_resolved_student_plan_monitors(&mut *conn, now).await?;
    Ok(cleared as usize)
}

/// Students enrolled in a course minus students holding a live copy of the
/// course's master plans
async fn detect_missing_student_plans(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    batch_size: u32,
) -> Result<usize> {
    let rows = sqlx::query(
        r#"
        SELECT cs.student_id, cs.course_id, sp.study_plan_id AS master_study_plan_id
        FROM course_students cs
        JOIN study_plans sp
          ON sp.course_id = cs.course_id
         AND sp.master_study_plan_id IS NULL
         AND sp.deleted_at IS NULL
        LEFT JOIN student_study_plans ssp
          ON ssp.master_study_plan_id = sp.study_plan_id
         AND ssp.student_id = cs.student_id
         AND ssp.deleted_at IS NULL
        WHERE cs.deleted_at IS NULL
          AND ssp.study_plan_id IS NULL
        LIMIT ?
        "#,
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut conn = pool.acquire().await?;
    for row in &rows {
        let monitor = monitors::missing_student_plan_monitor(
            row.get("student_id"),
            row.get("course_id"),
            row.get("master_study_plan_id"),
            now,
        );
        monitors::upsert_monitor(&mut *conn, &monitor).await?;
    }

    Ok(rows.len())
}

/// Live master items minus the items present in each live copy plan
async fn detect_missing_items(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    batch_size: u32,
) -> Result<usize> {
    let rows = sqlx::query(
        r#"
        SELECT sp.study_plan_id AS copy_plan_id,
               sp.master_study_plan_id,
               sp.course_id,
               ssp.student_id,
               mi.study_plan_item_id AS master_item_id,
               mi.content_structure,
               mi.content_structure_flatten,
               mi.display_order
        FROM study_plans sp
        JOIN study_plan_items mi
          ON mi.study_plan_id = sp.master_study_plan_id
         AND mi.deleted_at IS NULL
        LEFT JOIN study_plan_items ci
          ON ci.study_plan_id = sp.study_plan_id
         AND ci.content_structure_flatten = mi.content_structure_flatten
         AND ci.deleted_at IS NULL
        LEFT JOIN student_study_plans ssp
          ON ssp.study_plan_id = sp.study_plan_id
         AND ssp.deleted_at IS NULL
        WHERE sp.deleted_at IS NULL
          AND sp.master_study_plan_id IS NOT NULL
          AND ci.study_plan_item_id IS NULL
        LIMIT ?
        "#,
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let mut conn = pool.acquire().await?;
    for row in &rows {
        let content: String = row.get("content_structure");
        let payload = MonitorPayload {
            study_plan_id: Some(row.get("copy_plan_id")),
            master_study_plan_id: None,
            master_item_id: None,
            content_structure: Some(serde_json::from_str(&content)?),
            display_order: Some(row.get("display_order")),
        };
        let student_id: Option<String> = row.get("student_id");
        let monitor = monitors::missing_item_monitor(
            student_id.as_deref(),
            row.get("course_id"),
            row.get("copy_plan_id"),
            row.get("master_study_plan_id"),
            row.get("master_item_id"),
            row.get("content_structure_flatten"),
            payload,
            now,
        );
        monitors::upsert_monitor(&mut *conn, &monitor).await?;
    }

    Ok(rows.len())
}

/// Repair recorded item drift through the replicator's insert path, so a
/// repaired row is indistinguishable from one created at clone time. Each
/// item gets its own transaction; one failure is logged and the scan moves
/// on.
async fn repair_missing_items(
    pool: &SqlitePool,
    now: DateTime<Utc>,
    batch_size: u32,
) -> Result<(usize, usize)> {
    let pending =
        monitors::live_unrepaired_monitors(pool, MonitorKind::StudyPlanItem, batch_size).await?;

    let mut repaired = 0;
    let mut failures = 0;
    for monitor in &pending {
        match repair_one_item(pool, monitor, now).await {
            Ok(()) => repaired += 1,
            Err(e) => {
                failures += 1;
                warn!(
                    monitor = monitor.study_plan_monitor_id,
                    natural_key = monitor.natural_key,
                    "item repair failed: {e}"
                );
            }
        }
    }

    Ok((repaired, failures))
}

async fn repair_one_item(
    pool: &SqlitePool,
    monitor: &lms_common::db::StudyPlanMonitor,
    now: DateTime<Utc>,
) -> Result<()> {
    let master_item_id = monitor
        .payload
        .master_item_id
        .as_deref()
        .ok_or_else(|| lms_common::Error::Internal("monitor payload missing item id".into()))?;
    let copy_plan_id = monitor
        .study_plan_id
        .as_deref()
        .ok_or_else(|| lms_common::Error::Internal("monitor payload missing plan id".into()))?;

    let mut tx = pool.begin().await?;
    let master_item = study_plan_items::get_live_item(&mut *tx, master_item_id).await?;
    replicator::insert_copied_item(&mut *tx, copy_plan_id, &master_item, now).await?;
    monitors::mark_auto_upserted(&mut *tx, &monitor.study_plan_monitor_id, now).await?;
    tx.commit().await?;

    Ok(())
}

/// Spawn the periodic scan loop. The worker itself is stateless; `now` is
/// taken per tick so scans stay independently testable.
pub fn spawn_periodic(
    pool: SqlitePool,
    bus: Arc<EventBus>,
    interval: Duration,
    batch_size: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = interval.as_secs(), "consistency monitor started");
        loop {
            ticker.tick().await;
            let now = lms_common::time::now_utc();
            match run_scan(&pool, now, batch_size).await {
                Ok(report) => {
                    bus.emit(SyncEvent::MonitorScanCompleted {
                        missing_plans: report.missing_plans,
                        missing_items: report.missing_items,
                        repaired: report.repaired,
                        repair_failures: report.repair_failures,
                        timestamp: now,
                    });
                }
                Err(e) => warn!("consistency scan failed: {e}"),
            }
        }
    })
}
