//! Study-plan replication
//!
//! Clones a master study plan and its items into course- or student-scoped
//! copies, and cascades deletion through the whole copy tree. This module
//! exclusively owns creation and destruction of plan, item, and membership
//! rows; the consistency monitor repairs through the same item insert path
//! rather than mutating rows directly.

use crate::allocator::{self, CounterParent};
use crate::db::{memberships, study_plan_items, study_plans};
use chrono::{DateTime, Utc};
use lms_common::db::{
    ContentStructure, CourseStudyPlan, PlanType, StudentStudyPlan, StudyPlan, StudyPlanItem,
};
use lms_common::events::{EventBus, SyncEvent};
use lms_common::Result;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;
use uuid::Uuid;

/// Result of an idempotent clone
#[derive(Debug, Clone)]
pub struct CloneOutcome {
    pub study_plan_id: String,
    /// False when the copy already existed and the call was a no-op
    pub created: bool,
}

/// Clone a master plan for a single student.
///
/// Idempotent on `(master_study_plan_id, student_id)`: a replay returns the
/// existing copy id without touching anything. A concurrent duplicate trips
/// the partial unique index and surfaces as `Conflict`.
pub async fn clone_for_student(
    pool: &SqlitePool,
    bus: Option<&EventBus>,
    master_study_plan_id: &str,
    student_id: &str,
    now: DateTime<Utc>,
) -> Result<CloneOutcome> {
    let mut tx = pool.begin().await?;
    let outcome = clone_for_student_tx(&mut *tx, master_study_plan_id, student_id, now).await?;
    tx.commit().await?;

    if outcome.created {
        if let Some(bus) = bus {
            bus.emit(SyncEvent::StudyPlanCloned {
                master_study_plan_id: master_study_plan_id.to_string(),
                study_plan_id: outcome.study_plan_id.clone(),
                student_id: Some(student_id.to_string()),
                course_id: None,
                timestamp: now,
            });
        }
    }
    Ok(outcome)
}

/// Transaction-level clone for a student, composable with enrollment
/// processing
pub(crate) async fn clone_for_student_tx(
    conn: &mut SqliteConnection,
    master_study_plan_id: &str,
    student_id: &str,
    now: DateTime<Utc>,
) -> Result<CloneOutcome> {
    let master = study_plans::get_live_plan(conn, master_study_plan_id).await?;

    if let Some(existing) =
        memberships::find_live_student_plan(conn, master_study_plan_id, student_id).await?
    {
        return Ok(CloneOutcome {
            study_plan_id: existing,
            created: false,
        });
    }

    let copy = copy_plan_row(&master, PlanType::Individual, now);
    study_plans::insert_plan(conn, &copy).await?;

    memberships::insert_student_study_plan(
        conn,
        &StudentStudyPlan {
            study_plan_id: copy.study_plan_id.clone(),
            student_id: student_id.to_string(),
            master_study_plan_id: Some(master_study_plan_id.to_string()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        },
    )
    .await?;

    copy_items(conn, master_study_plan_id, &copy.study_plan_id, now).await?;

    info!(
        master = master_study_plan_id,
        student = student_id,
        copy = copy.study_plan_id,
        "cloned study plan for student"
    );

    Ok(CloneOutcome {
        study_plan_id: copy.study_plan_id,
        created: true,
    })
}

/// Clone a master plan for a whole course
pub async fn clone_for_course(
    pool: &SqlitePool,
    bus: Option<&EventBus>,
    master_study_plan_id: &str,
    course_id: &str,
    now: DateTime<Utc>,
) -> Result<CloneOutcome> {
    let mut tx = pool.begin().await?;

    let master = study_plans::get_live_plan(&mut *tx, master_study_plan_id).await?;

    if let Some(existing) =
        memberships::find_live_course_plan(&mut *tx, master_study_plan_id, course_id).await?
    {
        tx.commit().await?;
        return Ok(CloneOutcome {
            study_plan_id: existing,
            created: false,
        });
    }

    let mut copy = copy_plan_row(&master, PlanType::Course, now);
    copy.course_id = course_id.to_string();
    study_plans::insert_plan(&mut *tx, &copy).await?;

    memberships::insert_course_study_plan(
        &mut *tx,
        &CourseStudyPlan {
            course_id: course_id.to_string(),
            study_plan_id: copy.study_plan_id.clone(),
            master_study_plan_id: Some(master_study_plan_id.to_string()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        },
    )
    .await?;

    copy_items(&mut *tx, master_study_plan_id, &copy.study_plan_id, now).await?;

    tx.commit().await?;

    if let Some(bus) = bus {
        bus.emit(SyncEvent::StudyPlanCloned {
            master_study_plan_id: master_study_plan_id.to_string(),
            study_plan_id: copy.study_plan_id.clone(),
            student_id: None,
            course_id: Some(course_id.to_string()),
            timestamp: now,
        });
    }

    Ok(CloneOutcome {
        study_plan_id: copy.study_plan_id,
        created: true,
    })
}

fn copy_plan_row(master: &StudyPlan, plan_type: PlanType, now: DateTime<Utc>) -> StudyPlan {
    StudyPlan {
        study_plan_id: Uuid::new_v4().to_string(),
        master_study_plan_id: Some(master.study_plan_id.clone()),
        course_id: master.course_id.clone(),
        book_id: master.book_id.clone(),
        school_id: master.school_id,
        name: master.name.clone(),
        status: master.status,
        plan_type,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    }
}

async fn copy_items(
    conn: &mut SqliteConnection,
    master_study_plan_id: &str,
    copy_plan_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let master_items = study_plan_items::live_items_for_plan(conn, master_study_plan_id).await?;
    for master_item in &master_items {
        insert_copied_item(conn, copy_plan_id, master_item, now).await?;
    }
    Ok(())
}

/// Insert one item copy under `copy_plan_id`, preserving the master's
/// content, display order, and default time windows. Per-student overrides
/// (ad-hoc windows, school dates) come later through the edit operations.
///
/// This is the single insert path shared by clone and monitor repair.
pub(crate) async fn insert_copied_item(
    conn: &mut SqliteConnection,
    copy_plan_id: &str,
    master_item: &StudyPlanItem,
    now: DateTime<Utc>,
) -> Result<StudyPlanItem> {
    let copy = StudyPlanItem {
        study_plan_item_id: Uuid::new_v4().to_string(),
        study_plan_id: copy_plan_id.to_string(),
        copy_study_plan_item_id: Some(master_item.study_plan_item_id.clone()),
        content_structure: master_item.content_structure.clone(),
        available_from: master_item.available_from,
        available_to: master_item.available_to,
        start_date: master_item.start_date,
        end_date: master_item.end_date,
        completed_at: None,
        school_date: master_item.school_date,
        display_order: master_item.display_order,
        status: master_item.status,
        created_at: now,
        updated_at: now,
        deleted_at: None,
    };
    study_plan_items::insert_item(conn, &copy).await?;
    Ok(copy)
}

/// Add a learning material to a master plan (curriculum edit), drawing the
/// display order from the topic counter
pub async fn add_master_item(
    pool: &SqlitePool,
    master_study_plan_id: &str,
    content_structure: ContentStructure,
    now: DateTime<Utc>,
) -> Result<StudyPlanItem> {
    let mut tx = pool.begin().await?;

    // Reject additions to copies; items flow into copies via the monitor
    let plan = study_plans::get_live_plan(&mut *tx, master_study_plan_id).await?;
    if !plan.is_master() {
        return Err(lms_common::Error::InvalidInput(format!(
            "study plan {master_study_plan_id} is a copy; add items to its master"
        )));
    }

    let order = allocator::allocate(
        &mut *tx,
        CounterParent::Topic(&content_structure.topic_id),
        1,
    )
    .await?;

    let item = study_plan_items::new_item(master_study_plan_id, content_structure, order, now);
    study_plan_items::insert_item(&mut *tx, &item).await?;

    tx.commit().await?;
    Ok(item)
}

/// Soft-delete a master plan and every plan reachable from it through
/// `master_study_plan_id`, with all their items and memberships, in one
/// transaction. Any failure aborts the entire cascade; a partially deleted
/// tree is never observable.
pub async fn delete_cascade(
    pool: &SqlitePool,
    bus: Option<&EventBus>,
    master_study_plan_id: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    let mut tx = pool.begin().await?;

    // Verify the root exists (live) before cascading
    study_plans::get_live_plan(&mut *tx, master_study_plan_id).await?;

    let plan_ids = study_plans::collect_plan_tree(&mut *tx, master_study_plan_id).await?;

    study_plan_items::soft_delete_items_for_plans(&mut *tx, &plan_ids, now).await?;
    memberships::soft_delete_plan_memberships(&mut *tx, &plan_ids, now).await?;
    let deleted = study_plans::soft_delete_plans(&mut *tx, &plan_ids, now).await?;

    tx.commit().await?;

    info!(
        master = master_study_plan_id,
        plans = deleted,
        "cascade deleted study plan tree"
    );

    if let Some(bus) = bus {
        bus.emit(SyncEvent::StudyPlanDeleted {
            master_study_plan_id: master_study_plan_id.to_string(),
            plans_deleted: deleted as usize,
            timestamp: now,
        });
    }

    Ok(deleted as usize)
}

/// Soft-delete a student's copies (never the master) for the given courses:
/// the items, the membership join rows, and the copy plans themselves.
/// Used when an enrollment is revoked.
pub(crate) async fn remove_student_copies(
    conn: &mut SqliteConnection,
    student_id: &str,
    course_ids: &[String],
    now: DateTime<Utc>,
) -> Result<usize> {
    let plan_ids =
        memberships::student_copy_plans_for_courses(conn, student_id, course_ids).await?;
    if plan_ids.is_empty() {
        return Ok(0);
    }

    study_plan_items::soft_delete_items_for_plans(conn, &plan_ids, now).await?;
    memberships::soft_delete_plan_memberships(conn, &plan_ids, now).await?;
    let deleted = study_plans::soft_delete_plans(conn, &plan_ids, now).await?;

    Ok(deleted as usize)
}
