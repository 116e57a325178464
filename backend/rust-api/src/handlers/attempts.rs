use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::models::event::{RecordResponseRequest, StartAttemptRequest, SubmitAttemptRequest};
use crate::services::{attempt_service::AttemptService, AppState};

use super::{engine_error, signal_service, validation_error};

fn service(state: &AppState) -> AttemptService {
    AttemptService::new(
        state.mongo.clone(),
        state.redis.clone(),
        state.config.abandoned_attempt_ttl_days,
        signal_service(state),
    )
}

pub async fn start_attempt(
    State(state): State<Arc<AppState>>,
    Path(quiz_id): Path<String>,
    Json(req): Json<StartAttemptRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    req.validate().map_err(validation_error)?;

    tracing::info!("Start attempt: learner={}, quiz={}", req.learner_id, quiz_id);

    let response = service(&state)
        .start_attempt(&quiz_id, &req.learner_id, &state.locks)
        .await
        .map_err(engine_error)?;

    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn record_response(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    Json(req): Json<RecordResponseRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    req.validate().map_err(validation_error)?;

    tracing::info!(
        "Record response: attempt={}, question={}",
        attempt_id,
        req.question_id
    );

    service(&state)
        .record_response(&attempt_id, &req, &state.locks)
        .await
        .map_err(engine_error)?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Path(attempt_id): Path<String>,
    Json(req): Json<SubmitAttemptRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    req.validate().map_err(validation_error)?;

    tracing::info!("Submit attempt: attempt={}", attempt_id);

    let response = service(&state)
        .submit(&attempt_id, &req.learner_id, &state.locks)
        .await
        .map_err(engine_error)?;

    Ok((StatusCode::OK, Json(response)))
}
