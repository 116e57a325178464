use std::collections::{HashMap, HashSet};

use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::Database;
use redis::aio::ConnectionManager;

use crate::engine::{enrollment, module_gate};
use crate::error::EngineResult;
use crate::metrics::{CERTIFICATIONS_ISSUED_TOTAL, MODULES_COMPLETED_TOTAL};
use crate::models::course::{Course, CourseModule, PartContent};
use crate::models::event::{CourseCertified, ModuleCompleted, OutboundSignal};
use crate::models::progress::{Enrollment, ModuleProgress, PartProgress};
use crate::models::quiz::QuizAttempt;
use crate::services::signal_service::SignalService;
use crate::services::ResourceLocks;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Rolls part-level mutations up through the module gate into the
/// course enrollment. Always recomputes from the child records instead
/// of patching counters, so missed updates cannot cause drift.
pub struct EnrollmentService {
    mongo: Database,
    redis: ConnectionManager,
    signals: SignalService,
}

/// Part-level state gathered for one module evaluation.
struct ModulePartState {
    completed: HashMap<String, bool>,
    touched: HashSet<String>,
    minutes: f64,
}

impl EnrollmentService {
    pub fn new(mongo: Database, redis: ConnectionManager, signals: SignalService) -> Self {
        Self {
            mongo,
            redis,
            signals,
        }
    }

    /// Re-evaluates the touched module and recomputes the enrollment,
    /// dispatching any module-completed / course-certified signals the
    /// update earned. Caller holds the (learner, part-or-attempt) lock;
    /// module and enrollment records take their own keyed locks here.
    pub async fn refresh(
        &self,
        course: &Course,
        module: &CourseModule,
        learner_id: &str,
        locks: &ResourceLocks,
    ) -> EngineResult<()> {
        let mut signals = Vec::new();
        let now = Utc::now();

        // Module rollup under the (learner, module) key.
        let newly_completed = {
            let _guard = locks
                .acquire(&ResourceLocks::key(learner_id, &module.id))
                .await;

            let state = self.module_part_state(module, learner_id).await?;
            let stored = self.load_module_progress(learner_id, &module.id).await?;
            let outcome = module_gate::evaluate(
                module,
                &course.id,
                learner_id,
                stored.as_ref(),
                &state.completed,
                &state.touched,
                state.minutes,
                now,
            );
            self.store_module_progress(&outcome.progress).await?;
            outcome.newly_completed
        };

        if newly_completed {
            tracing::info!(
                "Module completed: learner={}, module={}, course={}",
                learner_id,
                module.id,
                course.id
            );
            MODULES_COMPLETED_TOTAL
                .with_label_values(&[course.id.as_str()])
                .inc();
            signals.push(OutboundSignal::ModuleCompleted(ModuleCompleted {
                learner_id: learner_id.to_string(),
                course_id: course.id.clone(),
                module_id: module.id.clone(),
                timestamp: now,
            }));
        }

        // Course rollup under the (learner, course) key.
        let newly_certified = {
            let _guard = locks
                .acquire(&ResourceLocks::key(learner_id, &course.id))
                .await;

            let modules = self.load_course_modules(learner_id, &course.id).await?;
            let quiz_scores = self.best_passing_scores(course, learner_id).await?;
            let minutes = self.total_minutes(course, learner_id).await?;
            let existing = self.load_enrollment(learner_id, &course.id).await?;

            let outcome = enrollment::recompute(
                course,
                learner_id,
                &modules,
                &quiz_scores,
                minutes,
                existing.as_ref(),
                now,
            );
            self.store_enrollment(&outcome.enrollment).await?;
            self.invalidate_snapshot(learner_id, &course.id).await;

            if outcome.newly_certified {
                tracing::info!(
                    "Course certified: learner={}, course={}, final_score={:?}",
                    learner_id,
                    course.id,
                    outcome.enrollment.final_score
                );
                CERTIFICATIONS_ISSUED_TOTAL
                    .with_label_values(&[course.id.as_str()])
                    .inc();
            }
            outcome.newly_certified.then(|| CourseCertified {
                learner_id: learner_id.to_string(),
                course_id: course.id.clone(),
                timestamp: now,
                final_score: outcome.enrollment.final_score,
            })
        };

        if let Some(certified) = newly_certified {
            signals.push(OutboundSignal::CourseCertified(certified));
        }

        // Dispatched outside every keyed lock.
        self.signals.dispatch(signals);
        Ok(())
    }

    /// Read-only gate evaluation for dashboards. Never persists; a
    /// snapshot must not be an entry point for mutation.
    pub async fn gate_snapshot(
        &self,
        course: &Course,
        module: &CourseModule,
        learner_id: &str,
    ) -> EngineResult<module_gate::GateOutcome> {
        let state = self.module_part_state(module, learner_id).await?;
        let stored = self.load_module_progress(learner_id, &module.id).await?;
        Ok(module_gate::evaluate(
            module,
            &course.id,
            learner_id,
            stored.as_ref(),
            &state.completed,
            &state.touched,
            state.minutes,
            Utc::now(),
        ))
    }

    /// Completion map for the module's parts, used for gate checks at
    /// the ingestion boundary.
    pub async fn part_completion(
        &self,
        module: &CourseModule,
        learner_id: &str,
    ) -> EngineResult<HashMap<String, bool>> {
        Ok(self.module_part_state(module, learner_id).await?.completed)
    }

    async fn module_part_state(
        &self,
        module: &CourseModule,
        learner_id: &str,
    ) -> EngineResult<ModulePartState> {
        let part_ids: Vec<&str> = module.parts.iter().map(|p| p.id.as_str()).collect();
        let progress = self.load_part_progress(learner_id, &part_ids).await?;

        let mut completed: HashMap<String, bool> = HashMap::new();
        let mut touched: HashSet<String> = HashSet::new();
        let mut minutes = 0.0;

        for record in &progress {
            if record.furthest_position > 0.0 || record.percent_watched > 0.0 {
                touched.insert(record.part_id.clone());
            }
            completed.insert(record.part_id.clone(), record.completed);
            minutes += record.minutes_spent;
        }

        for part in &module.parts {
            if let PartContent::Quiz { quiz } = &part.content {
                let attempts = self.load_attempts(learner_id, &quiz.id).await?;
                if !attempts.is_empty() {
                    touched.insert(part.id.clone());
                }
                let passed = attempts.iter().any(|a| a.passed);
                completed.insert(part.id.clone(), passed);
                minutes += attempts.iter().map(QuizAttempt::minutes_spent).sum::<f64>();
            }
        }

        Ok(ModulePartState {
            completed,
            touched,
            minutes,
        })
    }

    /// Best passing percent per quiz-bearing mandatory part, for the
    /// final-score mean.
    async fn best_passing_scores(
        &self,
        course: &Course,
        learner_id: &str,
    ) -> EngineResult<Vec<f64>> {
        let mut scores = Vec::new();
        for quiz in course.quiz_parts().filter_map(|p| p.quiz()) {
            let attempts = self.load_attempts(learner_id, &quiz.id).await?;
            let best = attempts
                .iter()
                .filter(|a| a.passed)
                .map(|a| a.percent_score)
                .fold(None::<f64>, |acc, s| Some(acc.map_or(s, |b| b.max(s))));
            if let Some(best) = best {
                scores.push(best);
            }
        }
        Ok(scores)
    }

    async fn total_minutes(&self, course: &Course, learner_id: &str) -> EngineResult<f64> {
        let mut minutes = 0.0;
        for module in &course.modules {
            let part_ids: Vec<&str> = module.parts.iter().map(|p| p.id.as_str()).collect();
            minutes += self
                .load_part_progress(learner_id, &part_ids)
                .await?
                .iter()
                .map(|p| p.minutes_spent)
                .sum::<f64>();
            for part in &module.parts {
                if let PartContent::Quiz { quiz } = &part.content {
                    minutes += self
                        .load_attempts(learner_id, &quiz.id)
                        .await?
                        .iter()
                        .map(QuizAttempt::minutes_spent)
                        .sum::<f64>();
                }
            }
        }
        Ok(minutes)
    }

    async fn load_part_progress(
        &self,
        learner_id: &str,
        part_ids: &[&str],
    ) -> EngineResult<Vec<PartProgress>> {
        let collection: mongodb::Collection<PartProgress> =
            self.mongo.collection("part_progress");
        let filter = doc! { "learner_id": learner_id, "part_id": { "$in": part_ids } };
        let records = retry_async_with_config(RetryConfig::default(), || async {
            collection.find(filter.clone()).await?.try_collect().await
        })
        .await
        .context("Failed to load part progress")?;
        Ok(records)
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

    pub async fn load_module_progress(
        &self,
        learner_id: &str,
        module_id: &str,
    ) -> EngineResult<Option<ModuleProgress>> {
        let collection: mongodb::Collection<ModuleProgress> =
            self.mongo.collection("module_progress");
        let key = ModuleProgress::storage_key(learner_id, module_id);
        let record = retry_async_with_config(RetryConfig::default(), || async {
            collection.find_one(doc! { "_id": &key }).await
        })
        .await
        .context("Failed to load module progress")?;
        Ok(record)
    }

    async fn store_module_progress(&self, progress: &ModuleProgress) -> EngineResult<()> {
        let collection: mongodb::Collection<ModuleProgress> =
            self.mongo.collection("module_progress");
        retry_async_with_config(RetryConfig::aggressive(), || async {
            collection
                .replace_one(doc! { "_id": &progress.id }, progress)
                .upsert(true)
                .await
                .map(|_| ())
        })
        .await
        .context("Failed to store module progress")?;
        Ok(())
    }

    pub async fn load_course_modules(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> EngineResult<Vec<ModuleProgress>> {
        let collection: mongodb::Collection<ModuleProgress> =
            self.mongo.collection("module_progress");
        let filter = doc! { "learner_id": learner_id, "course_id": course_id };
        let records = retry_async_with_config(RetryConfig::default(), || async {
            collection.find(filter.clone()).await?.try_collect().await
        })
        .await
        .context("Failed to load course module progress")?;
        Ok(records)
    }

    pub async fn load_enrollment(
        &self,
        learner_id: &str,
        course_id: &str,
    ) -> EngineResult<Option<Enrollment>> {
        let collection: mongodb::Collection<Enrollment> = self.mongo.collection("enrollments");
        let key = Enrollment::storage_key(learner_id, course_id);
        let record = retry_async_with_config(RetryConfig::default(), || async {
            collection.find_one(doc! { "_id": &key }).await
        })
        .await
        .context("Failed to load enrollment")?;
        Ok(record)
    }

    async fn store_enrollment(&self, enrollment: &Enrollment) -> EngineResult<()> {
        let collection: mongodb::Collection<Enrollment> = self.mongo.collection("enrollments");
        retry_async_with_config(RetryConfig::aggressive(), || async {
            collection
                .replace_one(doc! { "_id": &enrollment.id }, enrollment)
                .upsert(true)
                .await
                .map(|_| ())
        })
        .await
        .context("Failed to store enrollment")?;
        Ok(())
    }

    async fn invalidate_snapshot(&self, learner_id: &str, course_id: &str) {
        let mut conn = self.redis.clone();
        let key = format!("snapshot:enrollment:{}:{}", learner_id, course_id);
        let res: Result<(), redis::RedisError> =
            redis::cmd("DEL").arg(&key).query_async(&mut conn).await;
        if let Err(e) = res {
            tracing::warn!("Failed to invalidate snapshot {}: {}", key, e);
        }
    }
}
