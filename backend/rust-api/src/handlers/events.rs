use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use std::sync::Arc;
use validator::Validate;

use crate::models::event::ProgressEventRequest;
use crate::services::{progress_service::ProgressService, AppState};

use super::{engine_error, signal_service, validation_error};

/// Ingests one raw progress event for a video or document part.
/// At-least-once delivery is expected; replays are harmless.
pub async fn report_progress(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProgressEventRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    req.validate().map_err(validation_error)?;

    tracing::info!(
        "Progress event: learner={}, part={}, position={}",
        req.learner_id,
        req.part_id,
        req.position
    );

    let service = ProgressService::new(
        state.mongo.clone(),
        state.redis.clone(),
        signal_service(&state),
    );

    let response = service
        .report_progress(&req, state.config.completion_threshold, &state.locks)
        .await
        .map_err(engine_error)?;

    Ok((StatusCode::OK, Json(response)))
}
