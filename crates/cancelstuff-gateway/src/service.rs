use crate::prompts;
use cancelstuff_assistant::{extract_html, parse_subscriptions, Assistant, Subscription};
use cancelstuff_core::{AssistantReply, CancelError, CancelResult};
use cancelstuff_session::{SessionState, SessionStore, SessionSummary};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default cap on a single chat message, in bytes.
pub const DEFAULT_MAX_MESSAGE_LEN: usize = 100_000;

/// Result of starting an audit.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub session_id: Uuid,
    pub message: String,
    pub cost_usd: Option<f64>,
    pub subscriptions: Vec<Subscription>,
}

/// Result of a chat turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub message: String,
    pub cost_usd: Option<f64>,
}

/// Result of report generation.
#[derive(Debug, Clone)]
pub struct ReportOutcome {
    pub html: String,
    pub cost_usd: Option<f64>,
}

/// The operations behind the HTTP routes.
///
/// Every assistant call goes through the session's serializer, so bursts of
/// requests for one session run one at a time while different sessions
/// proceed independently.
pub struct AuditService {
    sessions: Arc<SessionStore>,
    assistant: Arc<dyn Assistant>,
    max_message_len: usize,
}

impl AuditService {
    pub fn new(sessions: Arc<SessionStore>, assistant: Arc<dyn Assistant>) -> Self {
        Self {
            sessions,
            assistant,
            max_message_len: DEFAULT_MAX_MESSAGE_LEN,
        }
    }

    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Create a session for the uploaded statement and run the initial analysis.
    ///
    /// The caller only learns the session id on success, so a failed start
    /// destroys the session it created.
    pub async fn start_session(&self, upload: &[u8], filename: &str) -> CancelResult<StartOutcome> {
        if upload.is_empty() {
            return Err(CancelError::InvalidInput("No CSV file uploaded".into()));
        }

        let session = self.sessions.create().await?;
        let id = session.id;
        info!(session_id = %id, filename, bytes = upload.len(), "Starting audit");

        match self.analyze(id, upload, filename).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!(session_id = %id, error = %e, "Start failed, discarding session");
                self.sessions.destroy(id).await;
                Err(e)
            }
        }
    }

    async fn analyze(&self, id: Uuid, upload: &[u8], filename: &str) -> CancelResult<StartOutcome> {
        self.sessions.save_artifact(id, upload, filename).await?;
        let csv = self.sessions.read_artifact(id).await?.unwrap_or_default();

        self.sessions.transition(id, SessionState::Analyzing)?;
        let reply = self.call(id, prompts::initial_analysis(&csv), false).await?;
        self.sessions.transition(id, SessionState::Reviewing)?;

        let subscriptions = parse_subscriptions(&reply.text);
        debug!(session_id = %id, found = subscriptions.len(), "Initial analysis parsed");
        Ok(StartOutcome {
            session_id: id,
            message: reply.text,
            cost_usd: reply.cost_usd,
            subscriptions,
        })
    }

    /// Send one user message and return the assistant's answer.
    pub async fn chat(&self, id: Uuid, message: &str) -> CancelResult<ChatOutcome> {
        let message = sanitize_message(message, self.max_message_len)?;
        let preview: String = message.chars().take(50).collect();
        info!(session_id = %id, preview = %preview, "Chat turn");

        let reply = self.call(id, message, true).await?;
        if self.sessions.touch(id).is_err() {
            debug!(session_id = %id, "Session ended while chat was in flight");
        }
        Ok(ChatOutcome {
            message: reply.text,
            cost_usd: reply.cost_usd,
        })
    }

    /// Ask for the final HTML report and mark the session done.
    pub async fn generate_report(&self, id: Uuid) -> CancelResult<ReportOutcome> {
        info!(session_id = %id, "Generating report");
        let reply = self.call(id, prompts::REPORT.to_string(), true).await?;
        if self.sessions.transition(id, SessionState::Done).is_err() {
            debug!(session_id = %id, "Session ended while report was in flight");
        }
        Ok(ReportOutcome {
            html: extract_html(&reply.text).to_string(),
            cost_usd: reply.cost_usd,
        })
    }

    /// End the session and wait for its directory to be removed. Idempotent.
    pub async fn end_session(&self, id: Uuid) {
        info!(session_id = %id, "Ending session");
        self.sessions.destroy(id).await;
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        self.sessions.list()
    }

    fn call(
        &self,
        id: Uuid,
        prompt: String,
        continue_session: bool,
    ) -> impl Future<Output = CancelResult<AssistantReply>> + Send + 'static {
        let assistant = self.assistant.clone();
        self.sessions.enqueue(id, move |session| async move {
            assistant
                .invoke(&prompt, &session.working_dir, continue_session)
                .await
                .map_err(CancelError::from)
        })
    }
}

/// Strip control characters (keeping newlines and tabs) and enforce a length cap.
pub fn sanitize_message(input: &str, max_len: usize) -> CancelResult<String> {
    if input.len() > max_len {
        return Err(CancelError::InvalidInput(format!(
            "Message exceeds maximum length of {max_len} bytes"
        )));
    }
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect();
    if cleaned.trim().is_empty() {
        return Err(CancelError::InvalidInput("Message is empty".into()));
    }
    Ok(cleaned)
}
