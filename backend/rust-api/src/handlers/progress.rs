use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::error::EngineError;
use crate::models::event::{EnrollmentSnapshot, ModuleGateSnapshot, PartGateView};
use crate::services::{
    catalog_service::CatalogService, enrollment_service::EnrollmentService, AppState,
};

use super::{engine_error, signal_service};

const SNAPSHOT_CACHE_TTL_SECONDS: u64 = 30;

fn enrollments(state: &AppState) -> EnrollmentService {
    EnrollmentService::new(state.mongo.clone(), state.redis.clone(), signal_service(state))
}

/// GET /api/v1/enrollments/{learner_id}/{course_id}
///
/// Aggregate view across a whole course. Served from a short-TTL Redis
/// cache that rollups invalidate on every write, so staleness is
/// bounded by the TTL only when invalidation itself failed.
pub async fn get_enrollment(
    State(state): State<Arc<AppState>>,
    Path((learner_id, course_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    if let Some(snapshot) = cached_snapshot(&state, &learner_id, &course_id).await {
        crate::metrics::record_cache_hit();
        return Ok(Json(snapshot));
    }
    crate::metrics::record_cache_miss();

    let service = enrollments(&state);
    let enrollment = service
        .load_enrollment(&learner_id, &course_id)
        .await
        .map_err(engine_error)?
        .ok_or_else(|| engine_error(EngineError::NotFound("enrollment")))?;
    let modules = service
        .load_course_modules(&learner_id, &course_id)
        .await
        .map_err(engine_error)?;

    let snapshot = EnrollmentSnapshot {
        enrollment,
        modules,
    };
    cache_snapshot(&state, &learner_id, &course_id, &snapshot).await;
    Ok(Json(snapshot))
}

/// GET /api/v1/modules/{module_id}/progress/{learner_id}
///
/// Gate view for one module: which parts the learner may touch and the
/// rolled-up module status. Computed fresh; never persisted.
pub async fn get_module_progress(
    State(state): State<Arc<AppState>>,
    Path((module_id, learner_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let catalog = CatalogService::new(state.mongo.clone(), state.redis.clone());
    let course = catalog
        .course_for_module(&module_id)
        .await
        .map_err(engine_error)?;
    let module = course
        .module(&module_id)
        .ok_or_else(|| engine_error(EngineError::NotFound("module")))?;

    let outcome = enrollments(&state)
        .gate_snapshot(&course, module, &learner_id)
        .await
        .map_err(engine_error)?;

    let snapshot = ModuleGateSnapshot {
        progress: outcome.progress,
        parts: outcome
            .parts
            .into_iter()
            .map(|g| PartGateView {
                part_id: g.part_id,
                order: g.order,
                available: g.available,
                completed: g.completed,
            })
            .collect(),
    };
    Ok(Json(snapshot))
}

async fn cached_snapshot(
    state: &AppState,
    learner_id: &str,
    course_id: &str,
) -> Option<EnrollmentSnapshot> {
    let mut conn = state.redis.clone();
    let cached: Option<String> = redis::cmd("GET")
        .arg(snapshot_key(learner_id, course_id))
        .query_async(&mut conn)
        .await
        .ok()?;
    serde_json::from_str(&cached?).ok()
}

async fn cache_snapshot(
    state: &AppState,
    learner_id: &str,
    course_id: &str,
    snapshot: &EnrollmentSnapshot,
) {
    let Ok(json) = serde_json::to_string(snapshot) else {
        return;
    };
    let mut conn = state.redis.clone();
    let res: Result<(), redis::RedisError> = redis::cmd("SETEX")
        .arg(snapshot_key(learner_id, course_id))
        .arg(SNAPSHOT_CACHE_TTL_SECONDS)
        .arg(json)
        .query_async(&mut conn)
        .await;
    if let Err(e) = res {
        tracing::warn!(
            "Failed to cache enrollment snapshot {}:{}: {}",
            learner_id,
            course_id,
            e
        );
    }
}

fn snapshot_key(learner_id: &str, course_id: &str) -> String {
    format!("snapshot:enrollment:{}:{}", learner_id, course_id)
}
