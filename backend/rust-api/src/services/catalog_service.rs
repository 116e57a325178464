use anyhow::Context;
use mongodb::bson::doc;
use mongodb::Database;
use redis::aio::ConnectionManager;

use crate::error::{EngineError, EngineResult};
use crate::metrics::{record_cache_hit, record_cache_miss, track_db_operation};
use crate::models::Course;
use crate::utils::retry::{retry_async_with_config, RetryConfig};

const COURSE_CACHE_TTL_SECONDS: u64 = 300;

/// Read-only access to authored course/quiz definitions. Definitions
/// change rarely, so hot lookups are served from a short-TTL Redis
/// cache in front of the `courses` collection.
pub struct CatalogService {
    mongo: Database,
    redis: ConnectionManager,
}

impl CatalogService {
    pub fn new(mongo: Database, redis: ConnectionManager) -> Self {
        Self { mongo, redis }
    }

    pub async fn course(&self, course_id: &str) -> EngineResult<Course> {
        if let Some(course) = self.cached_course(course_id).await {
            record_cache_hit();
            return Ok(course);
        }
        record_cache_miss();

        let course = self
            .find_course(doc! { "_id": course_id })
            .await?
            .ok_or(EngineError::NotFound("course"))?;
        self.cache_course(&course).await;
        Ok(course)
    }

    /// Resolves the course owning the given video/document/quiz part.
    pub async fn course_for_part(&self, part_id: &str) -> EngineResult<Course> {
        let course = self
            .find_course(doc! { "modules.parts.id": part_id })
            .await?
            .ok_or(EngineError::NotFound("part"))?;
        self.cache_course(&course).await;
        Ok(course)
    }

    /// Resolves the course owning the quiz-bearing part for a quiz id.
    pub async fn course_for_quiz(&self, quiz_id: &str) -> EngineResult<Course> {
        let course = self
            .find_course(doc! { "modules.parts.quiz.id": quiz_id })
            .await?
            .ok_or(EngineError::NotFound("quiz"))?;
        self.cache_course(&course).await;
        Ok(course)
    }

    /// Resolves the course containing the given module.
    pub async fn course_for_module(&self, module_id: &str) -> EngineResult<Course> {
        let course = self
            .find_course(doc! { "modules.id": module_id })
            .await?
            .ok_or(EngineError::NotFound("module"))?;
        self.cache_course(&course).await;
        Ok(course)
    }

    async fn find_course(
        &self,
        filter: mongodb::bson::Document,
    ) -> EngineResult<Option<Course>> {
        let collection: mongodb::Collection<Course> = self.mongo.collection("courses");
        let course = track_db_operation("find_one", "courses", async {
            retry_async_with_config(RetryConfig::default(), || async {
                collection.find_one(filter.clone()).await
            })
            .await
            .context("Failed to query courses collection")
        })
        .await?;
        Ok(course)
    }

    async fn cached_course(&self, course_id: &str) -> Option<Course> {
        let mut conn = self.redis.clone();
        let cached: Option<String> = redis::cmd("GET")
            .arg(format!("catalog:course:{}", course_id))
            .query_async(&mut conn)
            .await
            .ok()?;
        serde_json::from_str(&cached?).ok()
    }

    async fn cache_course(&self, course: &Course) {
        let Ok(json) = serde_json::to_string(course) else {
            return;
        };
        let mut conn = self.redis.clone();
        let res: Result<(), redis::RedisError> = redis::cmd("SETEX")
            .arg(format!("catalog:course:{}", course.id))
            .arg(COURSE_CACHE_TTL_SECONDS)
            .arg(json)
            .query_async(&mut conn)
            .await;
        if let Err(e) = res {
            // Cache population is best effort; Mongo remains the source
            // of truth.
            tracing::warn!("Failed to cache course {}: {}", course.id, e);
        }
    }
}
