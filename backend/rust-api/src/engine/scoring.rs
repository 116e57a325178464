use std::collections::BTreeSet;

use crate::models::quiz::{Answer, Question, QuestionKind};

/// Grading verdict for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Correct,
    Incorrect,
    /// Free-text responses cannot be auto-graded and await manual
    /// review; they are never silently marked correct.
    NeedsReview,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreOutcome {
    pub verdict: Verdict,
    pub points_awarded: u32,
}

impl ScoreOutcome {
    fn incorrect() -> Self {
        Self {
            verdict: Verdict::Incorrect,
            points_awarded: 0,
        }
    }
}

/// Pure scoring function: same inputs always produce the same output,
/// which keeps grading audits reproducible. An absent response is
/// scored as incorrect.
pub fn score(question: &Question, response: Option<&Answer>) -> ScoreOutcome {
    match &question.kind {
        QuestionKind::SingleChoice { choices } => {
            let Some(Answer::Choice { choice_id }) = response else {
                return ScoreOutcome::incorrect();
            };
            let correct = choices
                .iter()
                .any(|c| c.correct && c.id == *choice_id);
            graded(correct, question.point_value)
        }
        QuestionKind::MultiChoice { choices } => {
            let Some(Answer::Choices { choice_ids }) = response else {
                return ScoreOutcome::incorrect();
            };
            // Exact set equality, no partial credit.
            let submitted: BTreeSet<&str> = choice_ids.iter().map(String::as_str).collect();
            let expected: BTreeSet<&str> = choices
                .iter()
                .filter(|c| c.correct)
                .map(|c| c.id.as_str())
                .collect();
            graded(submitted == expected, question.point_value)
        }
        QuestionKind::TrueFalse { correct } => {
            let Some(Answer::Bool { value }) = response else {
                return ScoreOutcome::incorrect();
            };
            graded(value == correct, question.point_value)
        }
        QuestionKind::FreeText => ScoreOutcome {
            verdict: Verdict::NeedsReview,
            points_awarded: 0,
        },
    }
}

fn graded(correct: bool, point_value: u32) -> ScoreOutcome {
    if correct {
        ScoreOutcome {
            verdict: Verdict::Correct,
            points_awarded: point_value,
        }
    } else {
        ScoreOutcome::incorrect()
    }
}
