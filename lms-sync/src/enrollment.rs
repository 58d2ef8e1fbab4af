//! Enrollment event consumption
//!
//! Applies student-package events from the external billing/enrollment
//! system: membership upserts fan out into study-plan clones, deletes
//! remove the student's copies. One transaction per event; the bus
//! acknowledges only after commit, so handlers must tolerate redelivery.

use crate::db::{memberships, study_plans};
use crate::replicator;
use lms_common::events::{EventBus, PackageAction, StudentPackageEvent, SyncEvent};
use lms_common::time::now_utc;
use lms_common::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// What applying an event did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Memberships upserted; `cloned` counts newly created plan copies
    Upserted { cloned: usize },
    /// Memberships revoked; `removed` counts soft-deleted plan copies
    Deleted { removed: usize },
    /// Sequence at or below the last applied one for every touched
    /// membership; nothing changed
    Stale,
}

/// Apply one enrollment event inside a single transaction.
///
/// Idempotent by `(student_id, course_id, action)`: replaying an upsert
/// cannot double-insert (the clone path is idempotent), and deleting an
/// already-deleted membership is a no-op. Per-key ordering is enforced by
/// comparing the event sequence against `last_event_seq` on the membership
/// rows; out-of-order or redelivered events are skipped as [`Applied::Stale`].
pub async fn apply(
    pool: &SqlitePool,
    bus: Option<&EventBus>,
    event: &StudentPackageEvent,
) -> Result<Applied> {
    let now = now_utc();
    let mut tx = pool.begin().await?;

    // Last sequence seen across every membership this event touches;
    // deleted rows count, their sequence must keep advancing.
    let mut last_seq = 0i64;
    for package in &event.packages {
        if let Some(cs) =
            memberships::get_course_student(&mut *tx, &event.student_id, &package.course_id)
                .await?
        {
            last_seq = last_seq.max(cs.last_event_seq);
        }
    }
    if event.sequence <= last_seq {
        return Ok(Applied::Stale);
    }

    let applied = match event.action {
        PackageAction::Upserted => {
            let mut cloned = 0;
            for package in &event.packages {
                let course_student_id = memberships::upsert_course_student(
                    &mut *tx,
                    &event.student_id,
                    &package.course_id,
                    event.sequence,
                    now,
                )
                .await?;

                memberships::reconcile_access_paths(
                    &mut *tx,
                    &course_student_id,
                    &package.location_ids,
                    now,
                )
                .await?;

                let masters =
                    study_plans::masters_for_course(&mut *tx, &package.course_id).await?;
                for master in &masters {
                    let outcome = replicator::clone_for_student_tx(
                        &mut *tx,
                        &master.study_plan_id,
                        &event.student_id,
                        now,
                    )
                    .await?;
                    if outcome.created {
                        cloned += 1;
                    }
                }
            }
            Applied::Upserted { cloned }
        }
        PackageAction::Deleted => {
            let course_ids = event.course_ids();
            for package in &event.packages {
                if let Some(cs) = memberships::get_course_student(
                    &mut *tx,
                    &event.student_id,
                    &package.course_id,
                )
                .await?
                {
                    memberships::soft_delete_access_paths(&mut *tx, &cs.course_student_id, now)
                        .await?;
                }
                memberships::soft_delete_course_student(
                    &mut *tx,
                    &event.student_id,
                    &package.course_id,
                    event.sequence,
                    now,
                )
                .await?;
            }
            let removed =
                replicator::remove_student_copies(&mut *tx, &event.student_id, &course_ids, now)
                    .await?;
            Applied::Deleted { removed }
        }
    };

    tx.commit().await?;

    if let Some(bus) = bus {
        bus.emit(SyncEvent::EnrollmentApplied {
            student_id: event.student_id.clone(),
            course_ids: event.course_ids(),
            action: event.action,
            timestamp: now,
        });
    }

    Ok(applied)
}

/// Drain enrollment events from the ingestion queue and apply each one.
///
/// A failed apply is logged and dropped here; redelivery is the durable
/// bus's job (the transaction never committed, so a retry starts clean).
/// The loop ends when every sender is dropped.
pub fn spawn_consumer(
    pool: SqlitePool,
    bus: Arc<EventBus>,
    mut rx: mpsc::Receiver<StudentPackageEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("enrollment event consumer started");
        while let Some(event) = rx.recv().await {
            let student_id = event.student_id.clone();
            match apply(&pool, Some(&bus), &event).await {
                Ok(Applied::Stale) => {
                    debug!(
                        student = student_id,
                        sequence = event.sequence,
                        "skipped stale enrollment event"
                    );
                }
                Ok(applied) => {
                    debug!(student = student_id, ?applied, "applied enrollment event");
                }
                Err(e) => {
                    error!(
                        student = student_id,
                        sequence = event.sequence,
                        "failed to apply enrollment event: {e}"
                    );
                }
            }
        }
        info!("enrollment event consumer stopped");
    })
}
