use axum::http::StatusCode;
use thiserror::Error;

/// Error taxonomy for the progression engine.
///
/// Validation and not-found errors are rejected before any state mutation;
/// policy conflicts carry a specific reason code; storage failures are
/// retryable by the caller because every merge is idempotent.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid event: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("maximum attempts reached for this quiz")]
    AttemptsExhausted,

    #[error("an open attempt already exists for this quiz")]
    AttemptInProgress,

    #[error("attempt is no longer open")]
    AttemptClosed,

    #[error("part is locked until the preceding part is completed")]
    PartLocked,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn status(&self) -> StatusCode {
        match self {
            EngineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::AttemptsExhausted
            | EngineError::AttemptInProgress
            | EngineError::AttemptClosed
            | EngineError::PartLocked => StatusCode::CONFLICT,
            EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason code surfaced alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_failed",
            EngineError::NotFound(_) => "not_found",
            EngineError::AttemptsExhausted => "attempts_exhausted",
            EngineError::AttemptInProgress => "attempt_in_progress",
            EngineError::AttemptClosed => "attempt_closed",
            EngineError::PartLocked => "part_locked",
            EngineError::Storage(_) => "storage_error",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
