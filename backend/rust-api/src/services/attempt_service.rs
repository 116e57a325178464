use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Database;
use redis::aio::ConnectionManager;

use crate::engine::attempt::{self, FinalizeCause};
use crate::engine::module_gate;
use crate::error::{EngineError, EngineResult};
use crate::metrics::{
    record_cache_hit, record_cache_miss, ATTEMPTS_FINALIZED_TOTAL, ATTEMPTS_STARTED_TOTAL,
};
use crate::models::event::{
    RecordResponseRequest, StartAttemptResponse, SubmitAttemptResponse,
};
use crate::models::quiz::{AttemptState, Quiz, QuizAttempt};
use crate::services::catalog_service::CatalogService;
use crate::services::enrollment_service::EnrollmentService;
use crate::services::signal_service::SignalService;
use crate::services::ResourceLocks;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const SUBMIT_CACHE_TTL_SECONDS: u64 = 86400;

/// Owns the lifecycle of quiz attempts: creation under the attempt cap,
/// response recording, deadline enforcement and submission. All timing
/// decisions use the server clock; client-reported elapsed time is
/// never consulted.
pub struct AttemptService {
    mongo: Database,
    redis: ConnectionManager,
    catalog: CatalogService,
    enrollment: EnrollmentService,
    abandoned_ttl: Duration,
}

impl AttemptService {
    pub fn new(
        mongo: Database,
        redis: ConnectionManager,
        abandoned_ttl_days: i64,
        signals: SignalService,
    ) -> Self {
        Self {
            catalog: CatalogService::new(mongo.clone(), redis.clone()),
            enrollment: EnrollmentService::new(mongo.clone(), redis.clone(), signals),
            mongo,
            redis,
            abandoned_ttl: Duration::days(abandoned_ttl_days),
        }
    }

    pub async fn start_attempt(
        &self,
        quiz_id: &str,
        learner_id: &str,
        locks: &ResourceLocks,
    ) -> EngineResult<StartAttemptResponse> {
        let course = self.catalog.course_for_quiz(quiz_id).await?;
        let (module, part) = course
            .module_for_quiz(quiz_id)
            .ok_or(EngineError::NotFound("quiz"))?;
        let quiz = part.quiz().ok_or(EngineError::NotFound("quiz"))?;

        let (response, reclaimed) = {
            let _guard = locks
                .acquire(&ResourceLocks::key(learner_id, quiz_id))
                .await;

            let now = Utc::now();
            let mut attempts = self.load_attempts(learner_id, quiz_id).await?;
            let reclaimed = self.reclaim_expired(quiz, &mut attempts, now).await?;

            // Sequential gating: the quiz part must be unlocked.
            let completion = self.enrollment.part_completion(module, learner_id).await?;
            if !module_gate::is_part_available(module, &part.id, &completion) {
                ATTEMPTS_STARTED_TOTAL.with_label_values(&["rejected"]).inc();
                return Err(EngineError::PartLocked);
            }

            let new = match attempt::new_attempt(quiz, learner_id, &attempts, now) {
                Ok(a) => a,
                Err(e) => {
                    ATTEMPTS_STARTED_TOTAL.with_label_values(&["rejected"]).inc();
                    return Err(e);
                }
            };
            self.insert_attempt(&new).await?;
            ATTEMPTS_STARTED_TOTAL.with_label_values(&["accepted"]).inc();

            tracing::info!(
                "Attempt started: learner={}, quiz={}, attempt_number={}",
                learner_id,
                quiz_id,
                new.attempt_number
            );

            (
                StartAttemptResponse {
                    attempt_id: new.id.clone(),
                    attempt_number: new.attempt_number,
                    started_at: new.started_at,
                    deadline: new.deadline,
                },
                reclaimed,
            )
        };

        // A reclaimed attempt was graded from its recorded responses
        // and may have changed part completion.
        if reclaimed {
            self.enrollment
                .refresh(&course, module, learner_id, locks)
                .await?;
        }

        Ok(response)
    }

    pub async fn record_response(
        &self,
        attempt_id: &str,
        req: &RecordResponseRequest,
        locks: &ResourceLocks,
    ) -> EngineResult<()> {
        // Pre-lock load resolves ownership and the quiz definition only;
        // the copy mutated below is reloaded under the lock.
        let preview = self
            .load_attempt(attempt_id)
            .await?
            .ok_or(EngineError::NotFound("attempt"))?;
        if preview.learner_id != req.learner_id {
            return Err(EngineError::Validation(
                "attempt does not belong to this learner".into(),
            ));
        }

        let course = self.catalog.course_for_quiz(&preview.quiz_id).await?;
        let (module, part) = course
            .module_for_quiz(&preview.quiz_id)
            .ok_or(EngineError::NotFound("quiz"))?;
        let quiz = part.quiz().ok_or(EngineError::NotFound("quiz"))?;

        if !quiz.questions.iter().any(|q| q.id == req.question_id) {
            return Err(EngineError::Validation(format!(
                "unknown question {}",
                req.question_id
            )));
        }

        let expired = {
            let _guard = locks
                .acquire(&ResourceLocks::key(&preview.learner_id, &preview.quiz_id))
                .await;

            // Reload under the lock; a concurrent response or a sweeper
            // finalization may have changed the record since the preview.
            let mut attempt = self
                .load_attempt(attempt_id)
                .await?
                .ok_or(EngineError::NotFound("attempt"))?;

            let now = Utc::now();
            // Past-deadline receipt finalizes lazily, then rejects.
            if attempt::is_expired(&attempt, now, self.abandoned_ttl) {
                self.finalize_and_store(quiz, &mut attempt, now, FinalizeCause::DeadlineExpired)
                    .await?;
                true
            } else {
                attempt::record_response(&mut attempt, &req.question_id, req.answer.clone(), now)?;
                self.replace_attempt(&attempt).await?;
                false
            }
        };

        if expired {
            tracing::warn!("Attempt {} timed out on response receipt", attempt_id);
            self.enrollment
                .refresh(&course, module, &preview.learner_id, locks)
                .await?;
            return Err(EngineError::AttemptClosed);
        }

        Ok(())
    }

    /// Submits an attempt. Idempotent: a second submit on a closed
    /// attempt returns the stored result without recomputation.
    pub async fn submit(
        &self,
        attempt_id: &str,
        learner_id: &str,
        locks: &ResourceLocks,
    ) -> EngineResult<SubmitAttemptResponse> {
        // The cache key carries the learner, so a cached result is only
        // ever replayed to the learner who owns the attempt.
        if let Some(cached) = self.cached_submit(learner_id, attempt_id).await {
            record_cache_hit();
            return Ok(cached);
        }
        record_cache_miss();

        let preview = self
            .load_attempt(attempt_id)
            .await?
            .ok_or(EngineError::NotFound("attempt"))?;
        if preview.learner_id != learner_id {
            return Err(EngineError::Validation(
                "attempt does not belong to this learner".into(),
            ));
        }

        let course = self.catalog.course_for_quiz(&preview.quiz_id).await?;
        let (module, part) = course
            .module_for_quiz(&preview.quiz_id)
            .ok_or(EngineError::NotFound("quiz"))?;
        let quiz = part.quiz().ok_or(EngineError::NotFound("quiz"))?;

        let (attempt, transitioned) = {
            let _guard = locks
                .acquire(&ResourceLocks::key(learner_id, &preview.quiz_id))
                .await;

            // Reload under the lock; a sweeper or lazy-timeout
            // finalization may already have closed this attempt, and a
            // closed attempt is immutable.
            let mut attempt = self
                .load_attempt(attempt_id)
                .await?
                .ok_or(EngineError::NotFound("attempt"))?;

            let now = Utc::now();
            let transitioned = if attempt.is_open() {
                // Server-side deadline check at receipt; the client's
                // notion of elapsed time is irrelevant.
                let cause = if attempt::is_expired(&attempt, now, self.abandoned_ttl) {
                    FinalizeCause::DeadlineExpired
                } else {
                    FinalizeCause::Submitted
                };
                self.finalize_and_store(quiz, &mut attempt, now, cause).await?;
                true
            } else {
                false
            };
            (attempt, transitioned)
        };

        if transitioned {
            self.enrollment
                .refresh(&course, module, learner_id, locks)
                .await?;
        }

        let response = submit_response(&attempt);
        self.cache_submit(learner_id, attempt_id, &response).await;
        Ok(response)
    }

    /// Finalizes every expired open attempt. Used by the background
    /// sweeper; returns how many attempts it reclaimed.
    pub async fn sweep_expired(&self, locks: &ResourceLocks) -> EngineResult<usize> {
        let now = Utc::now();
        let open = self.load_open_attempts().await?;
        let mut reclaimed = 0usize;

        for stale in open {
            if !attempt::is_expired(&stale, now, self.abandoned_ttl) {
                continue;
            }
            let course = match self.catalog.course_for_quiz(&stale.quiz_id).await {
                Ok(c) => c,
                Err(EngineError::NotFound(_)) => {
                    tracing::warn!("Open attempt {} references unknown quiz", stale.id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some((module, part)) = course.module_for_quiz(&stale.quiz_id) else {
                continue;
            };
            let Some(quiz) = part.quiz() else { continue };

            let learner_id = stale.learner_id.clone();
            {
                let _guard = locks
                    .acquire(&ResourceLocks::key(&learner_id, &stale.quiz_id))
                    .await;
                // Reload under the lock; a racing submit may have
                // closed it already.
                let Some(mut current) = self.load_attempt(&stale.id).await? else {
                    continue;
                };
                if !attempt::is_expired(&current, Utc::now(), self.abandoned_ttl) {
                    continue;
                }
                self.finalize_and_store(
                    quiz,
                    &mut current,
                    Utc::now(),
                    FinalizeCause::DeadlineExpired,
                )
                .await?;
            }
            self.enrollment
                .refresh(&course, module, &learner_id, locks)
                .await?;
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    async fn reclaim_expired(
        &self,
        quiz: &Quiz,
        attempts: &mut [QuizAttempt],
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        let mut reclaimed = false;
        for stale in attempts.iter_mut().filter(|a| a.is_open()) {
            if attempt::is_expired(stale, now, self.abandoned_ttl) {
                self.finalize_and_store(quiz, stale, now, FinalizeCause::DeadlineExpired)
                    .await?;
                reclaimed = true;
            }
        }
        Ok(reclaimed)
    }

    async fn finalize_and_store(
        &self,
        quiz: &Quiz,
        attempt: &mut QuizAttempt,
        now: DateTime<Utc>,
        cause: FinalizeCause,
    ) -> EngineResult<()> {
        if !attempt::finalize(quiz, attempt, now, cause) {
            return Ok(());
        }
        self.replace_attempt(attempt).await?;

        let state = match attempt.state {
            AttemptState::Submitted => "submitted",
            AttemptState::TimedOut => "timed_out",
            AttemptState::Open => "open",
        };
        let passed = if attempt.passed { "true" } else { "false" };
        ATTEMPTS_FINALIZED_TOTAL
            .with_label_values(&[state, passed])
            .inc();
        tracing::info!(
            "Attempt finalized: id={}, state={}, percent_score={:.1}, passed={}",
            attempt.id,
            state,
            attempt.percent_score,
            attempt.passed
        );
        Ok(())
    }

    async fn load_attempts(
        &self,
        learner_id: &str,
        quiz_id: &str,
    ) -> EngineResult<Vec<QuizAttempt>> {
        let collection: mongodb::Collection<QuizAttempt> =
            self.mongo.collection("quiz_attempts");
        let filter = doc! { "learner_id": learner_id, "quiz_id": quiz_id };
        let records = retry_async_with_config(RetryConfig::default(), || async {
            collection.find(filter.clone()).await?.try_collect().await
        })
        .await
        .context("Failed to load quiz attempts")?;
        Ok(records)
    }

    pub async fn load_attempt(&self, attempt_id: &str) -> EngineResult<Option<QuizAttempt>> {
        let collection: mongodb::Collection<QuizAttempt> =
            self.mongo.collection("quiz_attempts");
        let record = retry_async_with_config(RetryConfig::default(), || async {
            collection.find_one(doc! { "_id": attempt_id }).await
        })
        .await
        .context("Failed to load quiz attempt")?;
        Ok(record)
    }

    async fn load_open_attempts(&self) -> EngineResult<Vec<QuizAttempt>> {
        let collection: mongodb::Collection<QuizAttempt> =
            self.mongo.collection("quiz_attempts");
        let records = retry_async_with_config(RetryConfig::default(), || async {
            collection
                .find(doc! { "state": "open" })
                .await?
                .try_collect()
                .await
        })
        .await
        .context("Failed to load open attempts")?;
        Ok(records)
    }

    async fn insert_attempt(&self, attempt: &QuizAttempt) -> EngineResult<()> {
        let collection: mongodb::Collection<QuizAttempt> =
            self.mongo.collection("quiz_attempts");
        retry_async_with_config(RetryConfig::aggressive(), || async {
            collection.insert_one(attempt).await.map(|_| ())
        })
        .await
        .context("Failed to insert quiz attempt")?;
        Ok(())
    }

    async fn replace_attempt(&self, attempt: &QuizAttempt) -> EngineResult<()> {
        let collection: mongodb::Collection<QuizAttempt> =
            self.mongo.collection("quiz_attempts");
        retry_async_with_config(RetryConfig::aggressive(), || async {
            collection
                .replace_one(doc! { "_id": &attempt.id }, attempt)
                .upsert(true)
                .await
                .map(|_| ())
        })
        .await
        .context("Failed to store quiz attempt")?;
        Ok(())
    }

    async fn cached_submit(
        &self,
        learner_id: &str,
        attempt_id: &str,
    ) -> Option<SubmitAttemptResponse> {
        let mut conn = self.redis.clone();
        let cached: Option<String> = redis::cmd("GET")
            .arg(submit_cache_key(learner_id, attempt_id))
            .query_async(&mut conn)
            .await
            .ok()?;
        serde_json::from_str(&cached?).ok()
    }

    async fn cache_submit(
        &self,
        learner_id: &str,
        attempt_id: &str,
        response: &SubmitAttemptResponse,
    ) {
        let Ok(json) = serde_json::to_string(response) else {
            return;
        };
        let mut conn = self.redis.clone();
        let res: Result<(), redis::RedisError> = redis::cmd("SETEX")
            .arg(submit_cache_key(learner_id, attempt_id))
            .arg(SUBMIT_CACHE_TTL_SECONDS)
            .arg(json)
            .query_async(&mut conn)
            .await;
        if let Err(e) = res {
            tracing::warn!("Failed to cache submit response for {}: {}", attempt_id, e);
        }
    }
}

/// Submit results are cached per (learner, attempt) so one learner can
/// never read back another learner's verdict.
fn submit_cache_key(learner_id: &str, attempt_id: &str) -> String {
    format!("idempotency:submit:{}:{}", learner_id, attempt_id)
}

fn submit_response(attempt: &QuizAttempt) -> SubmitAttemptResponse {
    let state = match attempt.state {
        AttemptState::Submitted => "submitted",
        AttemptState::TimedOut => "timed_out",
        AttemptState::Open => "open",
    };
    SubmitAttemptResponse {
        attempt_id: attempt.id.clone(),
        attempt_number: attempt.attempt_number,
        state: state.to_string(),
        raw_score: attempt.raw_score,
        percent_score: attempt.percent_score,
        passed: attempt.passed,
        needs_review: attempt.needs_review,
        finished_at: attempt.finished_at.unwrap_or(attempt.started_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_cache_keys_are_scoped_per_learner() {
        let attempt_id = QuizAttempt::storage_key("learner-1", "quiz-1", 1);
        let owner = submit_cache_key("learner-1", &attempt_id);
        let other = submit_cache_key("learner-2", &attempt_id);
        assert_ne!(owner, other);
        assert_eq!(owner, "idempotency:submit:learner-1:learner-1:quiz-1:1");
    }
}
