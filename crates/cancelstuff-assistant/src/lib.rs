//! External assistant invocation.
//!
//! The assistant is an opaque, slow, fallible collaborator. [`Assistant`] is
//! the seam the rest of the system talks to; [`ClaudeCli`] implements it by
//! running the `claude` CLI in headless mode inside a session directory.

pub mod claude_cli;
pub mod parse;

pub use claude_cli::ClaudeCli;
pub use parse::{extract_html, parse_subscriptions, Subscription};

use async_trait::async_trait;
use cancelstuff_core::{AssistantError, AssistantReply};
use std::path::Path;

/// Sends one prompt to the external assistant.
///
/// Implementations keep their own conversation state inside
/// `working_dir`; `continue_session` asks them to resume it instead of
/// starting fresh. Calls against the same `working_dir` must not overlap,
/// which callers guarantee through the session serializer.
#[async_trait]
pub trait Assistant: Send + Sync {
    async fn invoke(
        &self,
        prompt: &str,
        working_dir: &Path,
        continue_session: bool,
    ) -> Result<AssistantReply, AssistantError>;
}
