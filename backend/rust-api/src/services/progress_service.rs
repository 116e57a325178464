use anyhow::Context;
use chrono::Utc;
use mongodb::bson::doc;
use mongodb::Database;
use redis::aio::ConnectionManager;

use crate::engine::{module_gate, part_progress};
use crate::error::{EngineError, EngineResult};
use crate::metrics::PROGRESS_EVENTS_TOTAL;
use crate::models::course::PartContent;
use crate::models::event::{ProgressEventRequest, ProgressEventResponse};
use crate::models::progress::PartProgress;
use crate::services::catalog_service::CatalogService;
use crate::services::enrollment_service::EnrollmentService;
use crate::services::signal_service::SignalService;
use crate::services::ResourceLocks;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

/// Part progress tracker: merges raw position reports into the
/// monotonic high-water mark for one (learner, part).
pub struct ProgressService {
    mongo: Database,
    catalog: CatalogService,
    enrollment: EnrollmentService,
}

impl ProgressService {
    pub fn new(mongo: Database, redis: ConnectionManager, signals: SignalService) -> Self {
        Self {
            catalog: CatalogService::new(mongo.clone(), redis.clone()),
            enrollment: EnrollmentService::new(mongo.clone(), redis, signals),
            mongo,
        }
    }

    /// Applies one progress report. Duplicate, stale and out-of-order
    /// reports are safe: the merge is a max. Rollup signals earned by
    /// the update are dispatched before this returns.
    pub async fn report_progress(
        &self,
        req: &ProgressEventRequest,
        default_threshold: f64,
        locks: &ResourceLocks,
    ) -> EngineResult<ProgressEventResponse> {
        let course = self.catalog.course_for_part(&req.part_id).await?;
        let module = course
            .module_for_part(&req.part_id)
            .ok_or(EngineError::NotFound("part"))?;
        let part = course.part(&req.part_id).ok_or(EngineError::NotFound("part"))?;

        let (kind, merged) = {
            // One load-merge-store round per (learner, part).
            let _guard = locks
                .acquire(&ResourceLocks::key(&req.learner_id, &req.part_id))
                .await;

            let completion = self
                .enrollment
                .part_completion(module, &req.learner_id)
                .await?;
            if !module_gate::is_part_available(module, &req.part_id, &completion) {
                return Err(EngineError::PartLocked);
            }

            let existing = self.load(&req.learner_id, &req.part_id).await?;
            let now = Utc::now();
            let (kind, merged) = match &part.content {
                PartContent::Video {
                    duration_seconds,
                    completion_threshold,
                } => {
                    let threshold = completion_threshold.unwrap_or(default_threshold);
                    let merged = part_progress::merge_report(
                        existing.as_ref(),
                        &req.learner_id,
                        &req.part_id,
                        req.position,
                        *duration_seconds,
                        threshold,
                        now,
                    );
                    ("video", merged)
                }
                PartContent::Document => {
                    let merged = part_progress::acknowledge_document(
                        existing.as_ref(),
                        &req.learner_id,
                        &req.part_id,
                        now,
                    );
                    ("document", merged)
                }
                PartContent::Quiz { .. } => {
                    return Err(EngineError::Validation(
                        "progress events apply to video and document parts only".into(),
                    ));
                }
            };

            self.store(&merged).await?;
            (kind, merged)
        };

        PROGRESS_EVENTS_TOTAL
            .with_label_values(&[kind, "accepted"])
            .inc();

        self.enrollment
            .refresh(&course, module, &req.learner_id, locks)
            .await?;

        Ok(ProgressEventResponse {
            part_id: merged.part_id,
            furthest_position: merged.furthest_position,
            percent_watched: merged.percent_watched,
            completed: merged.completed,
        })
    }

    pub async fn load(
        &self,
        learner_id: &str,
        part_id: &str,
    ) -> EngineResult<Option<PartProgress>> {
        let collection: mongodb::Collection<PartProgress> =
            self.mongo.collection("part_progress");
        let key = PartProgress::storage_key(learner_id, part_id);
        let record = retry_async_with_config(RetryConfig::default(), || async {
            collection.find_one(doc! { "_id": &key }).await
        })
        .await
        .context("Failed to load part progress")?;
        Ok(record)
    }

    async fn store(&self, progress: &PartProgress) -> EngineResult<()> {
        let collection: mongodb::Collection<PartProgress> =
            self.mongo.collection("part_progress");
        retry_async_with_config(RetryConfig::aggressive(), || async {
            collection
                .replace_one(doc! { "_id": &progress.id }, progress)
                .upsert(true)
                .await
                .map(|_| ())
        })
        .await
        .context("Failed to store part progress")?;
        Ok(())
    }
}
