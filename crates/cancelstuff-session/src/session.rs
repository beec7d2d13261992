use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Where a session is in the audit conversation.
///
/// States only move forward. `Reviewing` is re-entered by every chat turn,
/// which leaves the state unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Directory provisioned, nothing uploaded yet.
    Initializing,
    /// The initial analysis call is running.
    Analyzing,
    /// The user is going through the assistant's findings.
    Reviewing,
    /// The final report has been produced.
    Done,
}

impl SessionState {
    /// Whether moving from `self` to `next` keeps the state machine monotonic.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        next >= self
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Initializing => "initializing",
            SessionState::Analyzing => "analyzing",
            SessionState::Reviewing => "reviewing",
            SessionState::Done => "done",
        };
        f.write_str(s)
    }
}

/// One user's isolated interaction lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: Uuid,
    pub working_dir: PathBuf,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub artifact_path: Option<PathBuf>,
}

impl Session {
    pub fn new(id: Uuid, working_dir: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id,
            working_dir,
            state: SessionState::Initializing,
            created_at: now,
            last_activity_at: now,
            artifact_path: None,
        }
    }

    /// Record activity. Never moves `last_activity_at` before `created_at`.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now().max(self.created_at);
    }

    /// Time since the last successful interaction, as of `now`.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_activity_at
    }

    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            id: self.id,
            state: self.state,
            age_secs: (now - self.created_at).num_seconds().max(0),
        }
    }
}

/// Diagnostic view of a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub state: SessionState,
    pub age_secs: i64,
}
