//! `cancelstuff.toml` loading.
//!
//! Every section and key is optional; a missing file yields the defaults.

use cancelstuff_core::{CancelError, CancelResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sessions: SessionsConfig,
    pub assistant: AssistantConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3847,
            max_upload_bytes: cancelstuff_gateway::DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Parent of all session directories; the system temp dir when unset.
    pub temp_root: Option<PathBuf>,
    pub dir_prefix: String,
    /// Copied into every new session directory if it exists.
    pub template_dir: PathBuf,
    pub max_idle_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            temp_root: None,
            dir_prefix: "jfc".to_string(),
            template_dir: PathBuf::from("skill-files"),
            max_idle_secs: 30 * 60,
            sweep_interval_secs: 10 * 60,
        }
    }
}

impl SessionsConfig {
    pub fn temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub command: String,
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            timeout_secs: 120,
        }
    }
}

impl AssistantConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Read `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> CancelResult<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(CancelError::Config(format!(
                    "Failed to read config '{}': {}",
                    path.display(),
                    e
                )))
            }
        };
        Self::parse(&content).map_err(|e| {
            CancelError::Config(format!("Failed to parse config '{}': {}", path.display(), e))
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply a `PORT` value from the environment, if any.
    pub fn apply_port_override(&mut self, port: Option<String>) -> CancelResult<()> {
        let Some(raw) = port else {
            return Ok(());
        };
        self.server.port = raw
            .trim()
            .parse()
            .map_err(|_| CancelError::Config(format!("Invalid PORT value '{raw}'")))?;
        Ok(())
    }

    pub fn validate(&self) -> CancelResult<()> {
        if self.sessions.dir_prefix.is_empty()
            || !self
                .sessions
                .dir_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CancelError::Config(format!(
                "sessions.dir_prefix must be non-empty and alphanumeric, got '{}'",
                self.sessions.dir_prefix
            )));
        }
        if self.assistant.timeout_secs == 0 {
            return Err(CancelError::Config("assistant.timeout_secs must be positive".into()));
        }
        if self.sessions.sweep_interval_secs == 0 {
            return Err(CancelError::Config(
                "sessions.sweep_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
