use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::progress::{Enrollment, ModuleProgress};
use super::quiz::Answer;

/// Raw client progress report for a video or document part. `position`
/// is the furthest playback position observed by that client; duplicates
/// and stale reports are harmless (max-merge downstream).
#[derive(Debug, Deserialize, Validate)]
pub struct ProgressEventRequest {
    #[validate(length(min = 1))]
    pub learner_id: String,
    #[validate(length(min = 1))]
    pub part_id: String,
    #[validate(range(min = 0.0))]
    pub position: f64,
    /// Client wall clock, accepted but never used for timing decisions.
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ProgressEventResponse {
    pub part_id: String,
    pub furthest_position: f64,
    pub percent_watched: f64,
    pub completed: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct StartAttemptRequest {
    #[validate(length(min = 1))]
    pub learner_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartAttemptResponse {
    pub attempt_id: String,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RecordResponseRequest {
    #[validate(length(min = 1))]
    pub learner_id: String,
    #[validate(length(min = 1))]
    pub question_id: String,
    pub answer: Answer,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAttemptRequest {
    #[validate(length(min = 1))]
    pub learner_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitAttemptResponse {
    pub attempt_id: String,
    pub attempt_number: u32,
    pub state: String,
    pub raw_score: u32,
    pub percent_score: f64,
    pub passed: bool,
    pub needs_review: bool,
    pub finished_at: DateTime<Utc>,
}

/// Read-only dashboard snapshot. Never an entry point for mutation.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollmentSnapshot {
    pub enrollment: Enrollment,
    pub modules: Vec<ModuleProgress>,
}

/// Per-part gate view for the module snapshot endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PartGateView {
    pub part_id: String,
    pub order: u32,
    pub available: bool,
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleGateSnapshot {
    pub progress: ModuleProgress,
    pub parts: Vec<PartGateView>,
}

/// Outbound signals consumed by notification dispatch and reporting
/// read models. Fire-and-forget; failures never fail ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundSignal {
    ModuleCompleted(ModuleCompleted),
    CourseCertified(CourseCertified),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleCompleted {
    pub learner_id: String,
    pub course_id: String,
    pub module_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourseCertified {
    pub learner_id: String,
    pub course_id: String,
    pub timestamp: DateTime<Utc>,
    pub final_score: Option<f64>,
}

impl OutboundSignal {
    pub fn signal_name(&self) -> &'static str {
        match self {
            OutboundSignal::ModuleCompleted(_) => "module-completed",
            OutboundSignal::CourseCertified(_) => "course-certified",
        }
    }
}
