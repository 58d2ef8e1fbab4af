//! Event types and EventBus for the LMSync services
//!
//! Two kinds of traffic pass through here:
//! - **Inbound enrollment events** ([`StudentPackageEvent`]) from the
//!   billing/enrollment system, consumed by the enrollment consumer.
//! - **Outbound notifications** ([`SyncEvent`]) broadcast on the
//!   [`EventBus`] after a transactional write commits, for read-side
//!   consumers (at-least-once; ack-after-commit).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// What an enrollment event does to the memberships it names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PackageAction {
    Upserted,
    Deleted,
}

/// One granted course inside a package, with its location scope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoursePackage {
    pub course_id: String,
    /// Physical locations granting access; may be empty
    #[serde(default)]
    pub location_ids: Vec<String>,
}

/// Enrollment/package change for one student.
///
/// Events for the same (student, course) key must be applied in `sequence`
/// order; the consumer skips anything at or below the last applied sequence,
/// which makes at-least-once redelivery safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentPackageEvent {
    pub student_id: String,
    pub sequence: i64,
    pub action: PackageAction,
    pub packages: Vec<CoursePackage>,
    pub timestamp: DateTime<Utc>,
}

impl StudentPackageEvent {
    pub fn course_ids(&self) -> Vec<String> {
        self.packages.iter().map(|p| p.course_id.clone()).collect()
    }
}

/// Notifications broadcast after a write commits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// An enrollment event was applied (memberships and copies updated)
    EnrollmentApplied {
        student_id: String,
        course_ids: Vec<String>,
        action: PackageAction,
        timestamp: DateTime<Utc>,
    },

    /// A master plan was cloned into a new copy
    StudyPlanCloned {
        master_study_plan_id: String,
        study_plan_id: String,
        student_id: Option<String>,
        course_id: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A master plan and its copy tree were soft-deleted
    StudyPlanDeleted {
        master_study_plan_id: String,
        plans_deleted: usize,
        timestamp: DateTime<Utc>,
    },

    /// A consistency-monitor scan finished
    MonitorScanCompleted {
        missing_plans: usize,
        missing_items: usize,
        repaired: usize,
        repair_failures: usize,
        timestamp: DateTime<Utc>,
    },
}

/// One-to-many broadcast bus over `tokio::sync::broadcast`.
///
/// Senders never block; slow subscribers observe `Lagged` and resubscribe.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Broadcast an event. Returns the number of receivers that saw it;
    /// zero subscribers is not an error.
    pub fn emit(&self, event: SyncEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
