use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Learner-course relationship with aggregate progress and the
/// certification verdict. Mutated only by the enrollment aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    #[serde(rename = "_id")]
    pub id: String,
    pub learner_id: String,
    pub course_id: String,
    pub status: EnrollmentStatus,
    pub percent_complete: f64,
    pub total_minutes_spent: f64,
    pub certified: bool,
    pub certified_at: Option<DateTime<Utc>>,
    pub final_score: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl EnrollmentStatus {
    /// Forward-only ordering.
    pub fn rank(self) -> u8 {
        match self {
            EnrollmentStatus::NotStarted => 0,
            EnrollmentStatus::InProgress => 1,
            EnrollmentStatus::Completed => 2,
        }
    }
}

impl Enrollment {
    pub fn storage_key(learner_id: &str, course_id: &str) -> String {
        format!("{}:{}", learner_id, course_id)
    }

    pub fn new(learner_id: &str, course_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: Self::storage_key(learner_id, course_id),
            learner_id: learner_id.to_string(),
            course_id: course_id.to_string(),
            status: EnrollmentStatus::NotStarted,
            percent_complete: 0.0,
            total_minutes_spent: 0.0,
            certified: false,
            certified_at: None,
            final_score: None,
            updated_at: now,
        }
    }
}

/// Per-(learner, module) rollup. Created lazily on first event touching
/// the module; status never moves backward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleProgress {
    #[serde(rename = "_id")]
    pub id: String,
    pub learner_id: String,
    pub module_id: String,
    pub course_id: String,
    pub status: ModuleStatus,
    pub percent_complete: f64,
    pub minutes_spent: f64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    Locked,
    Available,
    InProgress,
    Completed,
}

impl ModuleStatus {
    pub fn rank(self) -> u8 {
        match self {
            ModuleStatus::Locked => 0,
            ModuleStatus::Available => 1,
            ModuleStatus::InProgress => 2,
            ModuleStatus::Completed => 3,
        }
    }

    /// Keeps whichever status is further along.
    pub fn merge_forward(self, other: ModuleStatus) -> ModuleStatus {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

impl ModuleProgress {
    pub fn storage_key(learner_id: &str, module_id: &str) -> String {
        format!("{}:{}", learner_id, module_id)
    }
}

/// Per-(learner, part) high-water mark for video/document parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartProgress {
    #[serde(rename = "_id")]
    pub id: String,
    pub learner_id: String,
    pub part_id: String,
    /// Monotonic maximum, in seconds (video) or pages (document).
    pub furthest_position: f64,
    /// Monotonic maximum, 0-100.
    pub percent_watched: f64,
    /// Sticky: once true, stays true.
    pub completed: bool,
    pub minutes_spent: f64,
    pub updated_at: DateTime<Utc>,
}

impl PartProgress {
    pub fn storage_key(learner_id: &str, part_id: &str) -> String {
        format!("{}:{}", learner_id, part_id)
    }
}
