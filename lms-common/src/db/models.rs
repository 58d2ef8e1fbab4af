//! Database models

use crate::status::ItemWindow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored status of a plan or item (Archived is terminal, set out-of-band)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoredStatus {
    Active,
    Archived,
}

impl StoredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoredStatus::Active => "ACTIVE",
            StoredStatus::Archived => "ARCHIVED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(StoredStatus::Active),
            "ARCHIVED" => Some(StoredStatus::Archived),
            _ => None,
        }
    }
}

/// Scope of a study plan row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanType {
    /// Master or course-scoped copy
    Course,
    /// Student-scoped copy
    Individual,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Course => "COURSE",
            PlanType::Individual => "INDIVIDUAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "COURSE" => Some(PlanType::Course),
            "INDIVIDUAL" => Some(PlanType::Individual),
            _ => None,
        }
    }
}

/// The learning material an item points at: exactly one of assignment or
/// learning objective, with the full book context needed to reproduce it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentRef {
    Assignment { assignment_id: String },
    LearningObjective { lo_id: String },
}

impl ContentRef {
    pub fn material_id(&self) -> &str {
        match self {
            ContentRef::Assignment { assignment_id } => assignment_id,
            ContentRef::LearningObjective { lo_id } => lo_id,
        }
    }
}

/// Content reference plus its position in the curriculum tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStructure {
    pub course_id: String,
    pub book_id: String,
    pub chapter_id: String,
    pub topic_id: String,
    #[serde(flatten)]
    pub item: ContentRef,
}

impl ContentStructure {
    /// Flattened key used for per-plan uniqueness and monitor natural keys
    pub fn flatten(&self) -> String {
        match &self.item {
            ContentRef::LearningObjective { lo_id } => format!(
                "book::{}topic::{}chapter::{}course::{}lo::{}",
                self.book_id, self.topic_id, self.chapter_id, self.course_id, lo_id
            ),
            ContentRef::Assignment { assignment_id } => format!(
                "book::{}topic::{}chapter::{}course::{}assignment::{}",
                self.book_id, self.topic_id, self.chapter_id, self.course_id, assignment_id
            ),
        }
    }
}

/// A study plan. `master_study_plan_id = None` marks a master; rows pointing
/// at it are course- or student-scoped copies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyPlan {
    pub study_plan_id: String,
    pub master_study_plan_id: Option<String>,
    pub course_id: String,
    pub book_id: String,
    pub school_id: Option<i64>,
    pub name: Option<String>,
    pub status: StoredStatus,
    pub plan_type: PlanType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StudyPlan {
    pub fn is_master(&self) -> bool {
        self.master_study_plan_id.is_none()
    }
}

/// One scheduled learning material inside a study plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyPlanItem {
    pub study_plan_item_id: String,
    pub study_plan_id: String,
    /// Master item this copy was cloned from (None on master items)
    pub copy_study_plan_item_id: Option<String>,
    pub content_structure: ContentStructure,
    pub available_from: Option<DateTime<Utc>>,
    pub available_to: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub school_date: Option<DateTime<Utc>>,
    pub display_order: i64,
    pub status: StoredStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StudyPlanItem {
    /// Time fields for the classifier
    pub fn window(&self) -> ItemWindow {
        ItemWindow {
            available_from: self.available_from,
            available_to: self.available_to,
            start_date: self.start_date,
            end_date: self.end_date,
            completed_at: self.completed_at,
            deleted_at: self.deleted_at,
        }
    }
}

/// Join row binding a study-plan copy to a student. Soft-deleted only,
/// never hard-deleted, to preserve audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentStudyPlan {
    pub study_plan_id: String,
    pub student_id: String,
    pub master_study_plan_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Join row binding a study-plan copy to a course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseStudyPlan {
    pub course_id: String,
    pub study_plan_id: String,
    pub master_study_plan_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Course membership, driven by enrollment events. `last_event_seq` is the
/// sequence of the last applied event for this (student, course) key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseStudent {
    pub course_student_id: String,
    pub student_id: String,
    pub course_id: String,
    pub last_event_seq: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Location-scoped access path for a membership. Multiple live paths may
/// exist concurrently; stale locations are soft-deleted on reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseStudentAccessPath {
    pub course_student_id: String,
    pub location_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Drift class recorded by the consistency monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorKind {
    /// A student should have a plan copy but does not
    StudentStudyPlan,
    /// An existing copy is missing a learning item added to the master
    StudyPlanItem,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::StudentStudyPlan => "STUDENT_STUDY_PLAN",
            MonitorKind::StudyPlanItem => "STUDY_PLAN_ITEM",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STUDENT_STUDY_PLAN" => Some(MonitorKind::StudentStudyPlan),
            "STUDY_PLAN_ITEM" => Some(MonitorKind::StudyPlanItem),
            _ => None,
        }
    }
}

/// Everything needed to reproduce a missing study-plan item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorPayload {
    pub study_plan_id: Option<String>,
    pub master_study_plan_id: Option<String>,
    pub master_item_id: Option<String>,
    pub content_structure: Option<ContentStructure>,
    pub display_order: Option<i64>,
}

/// One detected drift occurrence, idempotent on its natural key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyPlanMonitor {
    pub study_plan_monitor_id: String,
    pub monitor_type: MonitorKind,
    pub natural_key: String,
    pub student_id: Option<String>,
    pub course_id: Option<String>,
    pub study_plan_id: Option<String>,
    pub payload: MonitorPayload,
    pub auto_upserted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// One student submission; append-only, immutable after insert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSubmission {
    pub student_submission_id: String,
    pub study_plan_item_id: String,
    pub student_id: String,
    pub content: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Grade attached to the submission that was current at grading time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentSubmissionGrade {
    pub student_submission_grade_id: String,
    pub student_submission_id: String,
    pub grade: f64,
    pub grader_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Chapter; carries the allocation counter for topic display orders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_id: String,
    pub book_id: String,
    pub name: Option<String>,
    pub current_topic_display_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Topic; carries the allocation counter for learning-material display orders
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: String,
    pub chapter_id: String,
    pub name: Option<String>,
    pub display_order: i64,
    pub current_lm_display_order: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}
