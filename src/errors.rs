use std::time::Duration;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use thiserror::Error;

/// Substrings that mark an operation failure as transient.
pub const RETRYABLE_PATTERNS: [&str; 5] = ["network", "timeout", "connection", "temporary", "rate limit"];

/// Substrings that mark an operation failure as permanent. These win over
/// [`RETRYABLE_PATTERNS`] when a message matches both.
pub const NON_RETRYABLE_PATTERNS: [&str; 4] = ["auth", "validation", "permission", "credential"];

#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Queue is full (max size: {max_size})")]
    QueueFull { max_size: usize },
    #[error("Job exceeded its time limit of {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("Circuit breaker is open for operation type '{0}'")]
    CircuitOpen(String),
    #[error("{0}")]
    Operation(String),
    #[error("Job already registered: {0}")]
    DuplicateJob(String),
    #[error("Unknown job: {0}")]
    UnknownJob(String),
    #[error("No handler registered for operation type: {0}")]
    UnknownOperationType(String),
    #[error("Invalid schedule '{schedule}': {reason}")]
    InvalidSchedule { schedule: String, reason: String },
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("Scheduler error: {0}")]
    Scheduler(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
}

impl JobError {
    /// Build an operation failure from anything printable.
    pub fn operation(message: impl Into<String>) -> Self {
        JobError::Operation(message.into())
    }

    /// Coarse job-level retry eligibility.
    ///
    /// Timeouts are never retried so that slow failures do not compound. An
    /// open circuit is transient. Operation failures are classified by
    /// message.
    pub fn is_retryable(&self) -> bool {
        match self {
            JobError::CircuitOpen(_) => true,
            JobError::Operation(message) => is_retryable_message(message),
            _ => false,
        }
    }
}

/// Classify an error message by substring matching.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    if NON_RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

impl From<sqlx::Error> for JobError {
    fn from(value: sqlx::Error) -> Self {
        JobError::Persistence(value.to_string())
    }
}

impl From<tokio_cron_scheduler::JobSchedulerError> for JobError {
    fn from(value: tokio_cron_scheduler::JobSchedulerError) -> Self {
        JobError::Scheduler(value.to_string())
    }
}

/// Errors surfaced by the admin HTTP layer.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Job queue is full")]
    QueueFull,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            AppError::QueueFull => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("30"));
                (StatusCode::TOO_MANY_REQUESTS, headers, "Job queue is full").into_response()
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response(),
        }
    }
}

impl From<JobError> for AppError {
    fn from(value: JobError) -> Self {
        match value {
            JobError::UnknownJob(name) => AppError::NotFound(format!("Unknown job: {}", name)),
            JobError::DuplicateJob(name) => AppError::Conflict(format!("Job already registered: {}", name)),
            JobError::QueueFull { .. } => AppError::QueueFull,
            e @ (JobError::Validation(_)
            | JobError::UnknownOperationType(_)
            | JobError::InvalidSchedule { .. }
            | JobError::InvalidTimezone(_)) => AppError::Validation(e.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}
