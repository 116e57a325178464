use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Quiz definition embedded in a quiz-type part. Authored elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub pass_threshold_percent: f64,
    pub max_attempts: u32,
    /// None = untimed.
    pub time_limit_seconds: Option<u32>,
    #[serde(default)]
    pub shuffle_questions: bool,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub point_value: u32,
    #[serde(flatten)]
    pub kind: QuestionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuestionKind {
    SingleChoice { choices: Vec<Choice> },
    MultiChoice { choices: Vec<Choice> },
    TrueFalse { correct: bool },
    FreeText,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub correct: bool,
}

/// A learner's answer to one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Answer {
    Choice { choice_id: String },
    Choices { choice_ids: Vec<String> },
    Bool { value: bool },
    Text { text: String },
}

/// One scored run of a quiz by one learner. Immutable once `state`
/// leaves `Open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizAttempt {
    #[serde(rename = "_id")]
    pub id: String,
    pub learner_id: String,
    pub quiz_id: String,
    /// 1-based, dense, never reused for this (learner, quiz).
    pub attempt_number: u32,
    pub state: AttemptState,
    /// question_id -> latest submitted answer.
    pub responses: BTreeMap<String, Answer>,
    pub raw_score: u32,
    pub percent_score: f64,
    pub passed: bool,
    /// True when the quiz contains free-text questions; those are never
    /// auto-graded and await manual review.
    pub needs_review: bool,
    pub started_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Open,
    Submitted,
    TimedOut,
}

impl QuizAttempt {
    pub fn storage_key(learner_id: &str, quiz_id: &str, attempt_number: u32) -> String {
        format!("{}:{}:{}", learner_id, quiz_id, attempt_number)
    }

    pub fn is_open(&self) -> bool {
        self.state == AttemptState::Open
    }

    /// Wall-clock minutes between start and finish, for enrollment time
    /// totals. Open attempts contribute nothing yet.
    pub fn minutes_spent(&self) -> f64 {
        match self.finished_at {
            Some(finished) => {
                let secs = (finished - self.started_at).num_seconds().max(0);
                secs as f64 / 60.0
            }
            None => 0.0,
        }
    }
}
