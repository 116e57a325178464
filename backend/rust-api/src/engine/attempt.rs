use chrono::{DateTime, Duration, Utc};

use crate::engine::scoring::{self, Verdict};
use crate::error::{EngineError, EngineResult};
use crate::models::quiz::{Answer, AttemptState, QuestionKind, Quiz, QuizAttempt};

/// Why an open attempt is being finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeCause {
    /// Explicit learner submission received before the deadline.
    Submitted,
    /// Server clock passed the deadline (or the abandonment TTL for
    /// untimed attempts).
    DeadlineExpired,
}

/// True when the server clock says this open attempt can no longer
/// accept input. Untimed attempts expire after the abandonment TTL so
/// they cannot pin `max_attempts` forever.
pub fn is_expired(attempt: &QuizAttempt, now: DateTime<Utc>, abandoned_ttl: Duration) -> bool {
    if !attempt.is_open() {
        return false;
    }
    match attempt.deadline {
        Some(deadline) => now > deadline,
        None => now > attempt.started_at + abandoned_ttl,
    }
}

/// Builds the next attempt for (learner, quiz), enforcing the attempt
/// cap and the one-open-attempt rule. `attempts` must already have had
/// expired attempts finalized by the caller.
pub fn new_attempt(
    quiz: &Quiz,
    learner_id: &str,
    attempts: &[QuizAttempt],
    now: DateTime<Utc>,
) -> EngineResult<QuizAttempt> {
    if attempts.iter().any(|a| a.is_open()) {
        return Err(EngineError::AttemptInProgress);
    }
    let finalized = attempts.iter().filter(|a| !a.is_open()).count() as u32;
    if finalized >= quiz.max_attempts {
        return Err(EngineError::AttemptsExhausted);
    }

    // Dense 1-based numbering, never reused.
    let attempt_number = attempts.iter().map(|a| a.attempt_number).max().unwrap_or(0) + 1;
    let deadline = quiz
        .time_limit_seconds
        .map(|secs| now + Duration::seconds(i64::from(secs)));

    Ok(QuizAttempt {
        id: QuizAttempt::storage_key(learner_id, &quiz.id, attempt_number),
        learner_id: learner_id.to_string(),
        quiz_id: quiz.id.clone(),
        attempt_number,
        state: AttemptState::Open,
        responses: Default::default(),
        raw_score: 0,
        percent_score: 0.0,
        passed: false,
        needs_review: false,
        started_at: now,
        deadline,
        finished_at: None,
    })
}

/// Records (or overwrites) the response to one question. Valid only
/// while the attempt is open and the server clock is before the
/// deadline.
pub fn record_response(
    attempt: &mut QuizAttempt,
    question_id: &str,
    answer: Answer,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    if !attempt.is_open() {
        return Err(EngineError::AttemptClosed);
    }
    if attempt.deadline.is_some_and(|d| now > d) {
        return Err(EngineError::AttemptClosed);
    }
    attempt.responses.insert(question_id.to_string(), answer);
    Ok(())
}

/// Sum of point values the engine can grade automatically. Free-text
/// questions are excluded from the pool.
pub fn gradable_points(quiz: &Quiz) -> u32 {
    quiz.questions
        .iter()
        .filter(|q| !matches!(q.kind, QuestionKind::FreeText))
        .map(|q| q.point_value)
        .sum()
}

/// Finalizes an open attempt: scores every question (unanswered counts
/// as wrong), stamps the state and finish time. Returns false without
/// touching anything when the attempt is already closed, which makes
/// repeated submits idempotent.
pub fn finalize(
    quiz: &Quiz,
    attempt: &mut QuizAttempt,
    now: DateTime<Utc>,
    cause: FinalizeCause,
) -> bool {
    if !attempt.is_open() {
        return false;
    }

    let mut raw = 0u32;
    let mut needs_review = false;
    for question in &quiz.questions {
        let outcome = scoring::score(question, attempt.responses.get(&question.id));
        raw += outcome.points_awarded;
        if outcome.verdict == Verdict::NeedsReview {
            needs_review = true;
        }
    }

    let pool = gradable_points(quiz);
    let percent = if pool > 0 {
        f64::from(raw) / f64::from(pool) * 100.0
    } else {
        0.0
    };

    attempt.raw_score = raw;
    attempt.percent_score = percent;
    attempt.passed = percent >= quiz.pass_threshold_percent;
    attempt.needs_review = needs_review;
    attempt.finished_at = Some(now);
    attempt.state = match cause {
        FinalizeCause::Submitted => AttemptState::Submitted,
        FinalizeCause::DeadlineExpired => AttemptState::TimedOut,
    };
    true
}
