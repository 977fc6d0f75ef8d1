use std::fmt::Debug;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::storage::{ConflictKind, StorageError},
    state::{bracket::BracketError, state_machine::InvalidTransition},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Session, match, question or archive does not exist (or no longer does).
    #[error("not found: {0}")]
    NotFound(String),
    /// The session cannot honor the command in its current state.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),
    /// The principal already answered this question or voted on this match.
    #[error("already recorded: {0}")]
    DuplicateSubmission(String),
    /// Identity assertion missing, malformed or expired.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Authenticated principal attempted a host-only command.
    #[error("host privilege required: {0}")]
    NotHost(String),
    /// Malformed input.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Storage backend failed transiently.
    #[error("storage unavailable")]
    StoreUnavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// A host command exceeded its time budget.
    #[error("operation timed out")]
    Timeout,
    /// Every join code candidate was taken.
    #[error("no free join code available")]
    CodeSpaceExhausted,
    /// Stored data does not match the expected shape.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable { .. } => ServiceError::StoreUnavailable(err),
            StorageError::Conflict {
                path,
                kind: ConflictKind::AlreadyExists,
            } => ServiceError::DuplicateSubmission(path),
            StorageError::Conflict { path, kind } => {
                ServiceError::InvalidTransition(format!("`{path}` changed concurrently ({kind:?})"))
            }
            StorageError::InvalidPath { path, reason } => {
                ServiceError::Validation(format!("`{path}`: {reason}"))
            }
            StorageError::InvalidBatch(_) | StorageError::Corrupt { .. } => {
                ServiceError::Internal(err.to_string())
            }
        }
    }
}

impl<S: Debug, E: Debug> From<InvalidTransition<S, E>> for ServiceError {
    fn from(err: InvalidTransition<S, E>) -> Self {
        ServiceError::InvalidTransition(err.to_string())
    }
}

impl From<BracketError> for ServiceError {
    fn from(err: BracketError) -> Self {
        match err {
            BracketError::TooFewContestants(_) => ServiceError::Validation(err.to_string()),
            BracketError::NoSuchMatch { .. } => ServiceError::NotFound(err.to_string()),
            BracketError::MatchPending { .. } => ServiceError::InvalidTransition(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::Validation(format!("validation failed: {err}"))
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {err}"))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Benign conflicts: the client should resync, not report a failure.
    #[error("conflict: {message}")]
    Conflict { message: String, code: &'static str },
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::InvalidTransition(message) => AppError::Conflict {
                message,
                code: "wait_for_host",
            },
            ServiceError::DuplicateSubmission(message) => AppError::Conflict {
                message,
                code: "already_recorded",
            },
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::NotHost(message) => AppError::Forbidden(message),
            ServiceError::Validation(message) => AppError::BadRequest(message),
            ServiceError::StoreUnavailable(source) => {
                AppError::ServiceUnavailable(source.to_string())
            }
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Timeout => AppError::ServiceUnavailable("operation timed out".into()),
            ServiceError::CodeSpaceExhausted => {
                AppError::ServiceUnavailable("no free join code, retry later".into())
            }
            ServiceError::Internal(message) => AppError::Internal(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    code: &'static str,
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "host_only"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict { code, .. } => (StatusCode::CONFLICT, code),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();
        let payload = Json(ErrorBody {
            message: self.to_string(),
            code,
        });

        (status, payload).into_response()
    }
}
