use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cancelstuff_core::{AssistantError, CancelError};
use serde::Serialize;
use tracing::error;

/// An error rendered as `{ "error": ..., "action": ..., "kind": ... }`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub kind: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &'static str, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            action: None,
            kind,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_input", error)
    }
}

impl From<CancelError> for ApiError {
    fn from(err: CancelError) -> Self {
        match err {
            CancelError::SessionNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "session_not_found", "Session not found")
                    .with_action("Please start over with a new upload")
            }
            CancelError::InvalidInput(msg) => Self::bad_request(msg),
            CancelError::Assistant(e) => e.into(),
            CancelError::Timeout(d) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                format!("Claude took longer than {}s to answer", d.as_secs()),
            )
            .with_action("Try again; long statements can take a while"),
            CancelError::Provisioning(msg) => {
                error!(error = %msg, "Session provisioning failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "provisioning",
                    "Could not set up a working directory for this session",
                )
                .with_action("Check free disk space and permissions on the temp directory, then retry")
            }
            other => {
                error!(error = %other, "Request failed");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", other.to_string())
            }
        }
    }
}

impl From<AssistantError> for ApiError {
    fn from(err: AssistantError) -> Self {
        let kind = err.kind();
        match err {
            AssistantError::AuthRequired => Self::new(
                StatusCode::UNAUTHORIZED,
                kind,
                "Please log in to Claude Code first",
            )
            .with_action("Run `claude` in your terminal to authenticate"),
            AssistantError::RateLimited => Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                kind,
                "Claude is busy. Please wait a moment.",
            )
            .with_action("Try again in 30 seconds"),
            AssistantError::NotFound(program) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                kind,
                format!("Claude Code not installed ('{program}' not found)"),
            )
            .with_action("Run: npm install -g @anthropic-ai/claude-code"),
            AssistantError::Timeout(d) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                kind,
                format!("Claude timed out after {}s", d.as_secs()),
            )
            .with_action("Try again; long statements can take a while"),
            AssistantError::NonZeroExit { code, stderr } => Self::new(
                StatusCode::BAD_GATEWAY,
                kind,
                format!("Claude exited with code {code}: {stderr}"),
            )
            .with_action("Check the Claude Code output above and retry"),
            AssistantError::Spawn(msg) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                kind,
                format!("Could not start Claude: {msg}"),
            )
            .with_action("Check that `claude` is executable and the temp directory is writable"),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), "invalid_upload", err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(&self)).into_response()
    }
}
