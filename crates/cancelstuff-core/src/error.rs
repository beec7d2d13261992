use crate::assistant::AssistantError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// A convenience `Result` alias using [`CancelError`].
pub type CancelResult<T> = Result<T, CancelError>;

/// Top-level error type for cancelstuff.
#[derive(Error, Debug)]
pub enum CancelError {
    /// Session directory or template setup failed. Nothing was registered.
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// No live session with this id.
    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    /// The external assistant call failed.
    #[error(transparent)]
    Assistant(#[from] AssistantError),

    /// A queued unit of work did not settle within its bound.
    #[error("Task timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The caller sent something unusable (missing field, empty upload, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A queued unit of work panicked or was aborted.
    #[error("Task error: {0}")]
    Task(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CancelError {
    /// True for failures where running the same step again may succeed.
    ///
    /// External-call failures never mutate session state, so they are always
    /// safe to retry; a missing session or bad input is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            CancelError::Assistant(e) => e.is_retryable(),
            CancelError::Timeout(_) | CancelError::Provisioning(_) | CancelError::Task(_) => true,
            _ => false,
        }
    }
}
