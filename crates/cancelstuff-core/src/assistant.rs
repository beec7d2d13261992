use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Text returned by a successful assistant call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    /// The assistant's answer.
    pub text: String,
    /// Reported cost of the call in USD, when the assistant provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// The assistant's own conversation id, when it provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_session_id: Option<String>,
}

impl AssistantReply {
    /// A reply carrying only text.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Ways an external assistant call can fail.
///
/// None of these mutate session state; turning them into user-facing
/// messages is left to the HTTP boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssistantError {
    /// The assistant binary is installed but the user is not logged in.
    #[error("assistant requires authentication")]
    AuthRequired,

    /// The assistant refused the call because of rate limiting.
    #[error("assistant is rate limited")]
    RateLimited,

    /// The assistant binary could not be found.
    #[error("assistant binary not found: {0}")]
    NotFound(String),

    /// The call exceeded its time bound and the process was killed.
    #[error("assistant timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The process exited unsuccessfully for an unrecognised reason.
    #[error("assistant exited with code {code}: {stderr}")]
    NonZeroExit {
        /// Exit code, `-1` when terminated by a signal.
        code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// The process could not be started for a reason other than a missing binary.
    #[error("failed to start assistant: {0}")]
    Spawn(String),
}

impl AssistantError {
    /// Stable machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            AssistantError::AuthRequired => "auth_required",
            AssistantError::RateLimited => "rate_limited",
            AssistantError::NotFound(_) => "not_found",
            AssistantError::Timeout(_) => "timeout",
            AssistantError::NonZeroExit { .. } => "non_zero_exit",
            AssistantError::Spawn(_) => "spawn",
        }
    }

    /// Whether retrying without user action can help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AssistantError::RateLimited
                | AssistantError::Timeout(_)
                | AssistantError::NonZeroExit { .. }
        )
    }
}
