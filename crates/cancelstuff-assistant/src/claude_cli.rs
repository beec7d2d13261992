use crate::Assistant;
use async_trait::async_trait;
use cancelstuff_core::{AssistantError, AssistantReply};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default bound on a single CLI call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Claude Code CLI assistant.
///
/// Runs `claude -p <prompt> --output-format json [-c]` with the session
/// directory as cwd, so the CLI keeps its conversation state there and `-c`
/// resumes it. Uses the user's existing Claude Code login; no API key needed.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ClaudeCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Arguments placed before the prompt flags on every call.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether `<program> --version` runs and exits successfully.
    pub async fn check_installed(&self) -> bool {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(VERSION_CHECK_TIMEOUT, cmd.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(program = %self.program, error = %e, "Assistant version check failed");
                false
            }
            Err(_) => false,
        }
    }

    fn command(&self, prompt: &str, working_dir: &Path, continue_session: bool) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.arg("-p").arg(prompt);
        cmd.arg("--output-format").arg("json");
        if continue_session {
            cmd.arg("-c");
        }
        cmd.current_dir(working_dir)
            .env("CLAUDE_PROJECT_DIR", working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for ClaudeCli {
    fn default() -> Self {
        Self::new("claude")
    }
}

#[async_trait]
impl Assistant for ClaudeCli {
    async fn invoke(
        &self,
        prompt: &str,
        working_dir: &Path,
        continue_session: bool,
    ) -> Result<AssistantReply, AssistantError> {
        // A missing cwd also surfaces as ENOENT, which would read as "binary not found".
        if !working_dir.is_dir() {
            return Err(AssistantError::Spawn(format!(
                "working directory {} does not exist",
                working_dir.display()
            )));
        }

        tracing::info!(
            dir = %working_dir.display(),
            continue_session,
            prompt_len = prompt.len(),
            "Running assistant"
        );

        let output = self.command(prompt, working_dir, continue_session).output();
        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AssistantError::NotFound(self.program.clone()));
            }
            Ok(Err(e)) => return Err(AssistantError::Spawn(e.to_string())),
            Err(_) => {
                // Dropping the output future kills the child.
                tracing::warn!(timeout_secs = self.timeout.as_secs(), "Assistant timed out");
                return Err(AssistantError::Timeout(self.timeout));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            tracing::debug!(stderr = %stderr.trim(), "Assistant stderr");
        }

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            tracing::warn!(exit_code = code, "Assistant exited unsuccessfully");
            return Err(classify_failure(code, &stderr));
        }

        let reply = parse_output(&stdout);
        tracing::info!(
            response_len = reply.text.len(),
            cost_usd = reply.cost_usd,
            "Assistant response received"
        );
        Ok(reply)
    }
}

/// Map an unsuccessful exit onto the failure taxonomy using stderr hints.
pub fn classify_failure(code: i32, stderr: &str) -> AssistantError {
    let lower = stderr.to_lowercase();
    if lower.contains("not authenticated") || lower.contains("log in") || lower.contains("login") {
        AssistantError::AuthRequired
    } else if lower.contains("rate limit") {
        AssistantError::RateLimited
    } else {
        AssistantError::NonZeroExit {
            code,
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Parse the CLI's JSON result, falling back to raw stdout.
///
/// Accepts a single JSON document or JSON-lines output, in which case the
/// last parseable line wins.
pub fn parse_output(stdout: &str) -> AssistantReply {
    let json: Option<serde_json::Value> = serde_json::from_str(stdout.trim()).ok().or_else(|| {
        stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line).ok())
    });

    let Some(json) = json.filter(serde_json::Value::is_object) else {
        tracing::warn!("Assistant output is not JSON, using raw text");
        return AssistantReply::text(stdout.trim());
    };

    let text = json["result"]
        .as_str()
        .filter(|s| !s.is_empty())
        .or_else(|| json["text"].as_str().filter(|s| !s.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| stdout.trim().to_string());

    AssistantReply {
        text,
        cost_usd: json["cost_usd"]
            .as_f64()
            .or_else(|| json["total_cost_usd"].as_f64()),
        external_session_id: json["session_id"].as_str().map(str::to_string),
    }
}
