//! Per-session working directories.
//!
//! Every session gets its own directory under a temp root. The assistant is
//! run with that directory as its cwd, so concurrent sessions never see each
//! other's files and a single recursive delete releases everything a session
//! produced.

use cancelstuff_core::{CancelError, CancelResult};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name used when sanitization leaves nothing usable.
const FALLBACK_ARTIFACT_NAME: &str = "upload.csv";

/// Provisions, populates and removes session directories.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    prefix: String,
    template: Option<PathBuf>,
}

impl Workspace {
    /// Session directories are created as `<root>/<prefix>-<id>`.
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            root: std::path::absolute(&root).unwrap_or(root),
            prefix: prefix.into(),
            template: None,
        }
    }

    /// Directory whose contents are copied into every new session.
    pub fn with_template(mut self, template: impl Into<PathBuf>) -> Self {
        self.template = Some(template.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn template(&self) -> Option<&Path> {
        self.template.as_deref()
    }

    pub fn session_dir(&self, id: Uuid) -> PathBuf {
        self.root.join(format!("{}-{}", self.prefix, id))
    }

    /// Create the directory for `id` and copy the template into it.
    ///
    /// A missing template is only a warning. Any other failure removes
    /// whatever was created and returns [`CancelError::Provisioning`].
    pub async fn provision(&self, id: Uuid) -> CancelResult<PathBuf> {
        let dir = self.session_dir(id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            CancelError::Provisioning(format!("failed to create {}: {e}", dir.display()))
        })?;

        let Some(template) = self.template.clone() else {
            debug!(session_id = %id, "No template configured");
            return Ok(dir);
        };

        if !tokio::fs::try_exists(&template).await.unwrap_or(false) {
            warn!(
                session_id = %id,
                template = %template.display(),
                "Template directory not found, continuing without support files"
            );
            return Ok(dir);
        }

        let dest = dir.clone();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&template, &dest))
            .await
            .map_err(|e| CancelError::Provisioning(format!("template copy aborted: {e}")))
            .and_then(|r| {
                r.map_err(|e| CancelError::Provisioning(format!("template copy failed: {e}")))
            });

        match copied {
            Ok(files) => {
                info!(session_id = %id, files = files.len(), "Copied template files");
                Ok(dir)
            }
            Err(e) => {
                self.teardown(id).await;
                Err(e)
            }
        }
    }

    /// Write an uploaded artifact into `dir` under a sanitized name.
    pub async fn save_artifact(
        &self,
        dir: &Path,
        bytes: &[u8],
        suggested_name: &str,
    ) -> CancelResult<PathBuf> {
        let path = dir.join(sanitize_filename(suggested_name));
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Read an artifact back as text. Invalid UTF-8 is replaced, not rejected.
    pub async fn read_artifact(&self, path: &Path) -> CancelResult<String> {
        let bytes = tokio::fs::read(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Recursively remove the directory for `id`. Never fails.
    pub async fn teardown(&self, id: Uuid) {
        let dir = self.session_dir(id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => info!(session_id = %id, "Cleaned up session directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(session_id = %id, "Session directory already gone");
            }
            Err(e) => warn!(
                session_id = %id,
                dir = %dir.display(),
                error = %e,
                "Session directory cleanup failed"
            ),
        }
    }
}

/// Reduce `name` to a single safe path component.
///
/// Characters outside `[A-Za-z0-9.-]` become `_` and leading dots are
/// dropped, so the result can never contain a separator or be `.`/`..`.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = replaced.trim_start_matches('.');
    if trimmed.is_empty() {
        FALLBACK_ARTIFACT_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Recursively copy the contents of `src` into `dst`.
///
/// Returns the copied files relative to `dst`, sorted.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<Vec<PathBuf>> {
    let mut copied = Vec::new();
    copy_tree_inner(src, dst, Path::new(""), &mut copied)?;
    copied.sort();
    Ok(copied)
}

fn copy_tree_inner(
    src: &Path,
    dst: &Path,
    relative: &Path,
    copied: &mut Vec<PathBuf>,
) -> io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let name = entry.file_name();
        let from = entry.path();
        let to = dst.join(&name);
        let rel = relative.join(&name);
        if from.is_dir() {
            copy_tree_inner(&from, &to, &rel, copied)?;
        } else {
            std::fs::copy(&from, &to)?;
            copied.push(rel);
        }
    }
    Ok(())
}

/// Where a skill directory lives inside the session template:
/// `<template_dir>/.claude/skills/<skill name>`, named after `source`.
pub fn skill_dest(template_dir: &Path, source: &Path) -> CancelResult<PathBuf> {
    let name = source
        .components()
        .next_back()
        .and_then(|c| match c {
            std::path::Component::Normal(name) => Some(name),
            _ => None,
        })
        .ok_or_else(|| {
            CancelError::Config(format!("cannot derive a skill name from {}", source.display()))
        })?;
    Ok(template_dir.join(".claude").join("skills").join(name))
}

/// Replace `dest` with a fresh copy of `source`.
///
/// Used to refresh the bundled template from its upstream checkout.
pub async fn sync_template(source: &Path, dest: &Path) -> CancelResult<Vec<PathBuf>> {
    if !tokio::fs::try_exists(source).await.unwrap_or(false) {
        return Err(CancelError::Config(format!(
            "source not found: {}",
            source.display()
        )));
    }

    match tokio::fs::remove_dir_all(dest).await {
        Ok(()) => info!(dest = %dest.display(), "Cleaned existing template files"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let (source, dest) = (source.to_path_buf(), dest.to_path_buf());
    let files = tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
        .await
        .map_err(|e| CancelError::Task(e.to_string()))??;
    Ok(files)
}
