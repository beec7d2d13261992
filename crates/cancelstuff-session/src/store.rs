use crate::serializer::RequestSerializer;
use crate::session::{Session, SessionState, SessionSummary};
use crate::workspace::Workspace;
use cancelstuff_core::{CancelError, CancelResult};
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// In-memory registry of live sessions.
///
/// Every registry mutation is a single synchronous critical section, so a
/// lookup never observes a half-created or half-destroyed session.
/// Directories and queued work are handled outside the lock.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    workspace: Workspace,
    serializer: Arc<RequestSerializer>,
}

impl SessionStore {
    pub fn new(workspace: Workspace, serializer: RequestSerializer) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            workspace,
            serializer: Arc::new(serializer),
        }
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn serializer(&self) -> &RequestSerializer {
        &self.serializer
    }

    /// Provision a new session and register it.
    ///
    /// Nothing is registered unless the directory was fully provisioned.
    pub async fn create(&self) -> CancelResult<Session> {
        let id = self.fresh_id();
        let dir = self.workspace.provision(id).await?;
        let session = Session::new(id, dir);
        self.sessions.write().insert(id, session.clone());
        info!(session_id = %id, dir = %session.working_dir.display(), "Session created");
        Ok(session)
    }

    fn fresh_id(&self) -> Uuid {
        let sessions = self.sessions.read();
        loop {
            let id = Uuid::new_v4();
            if !sessions.contains_key(&id) && !self.workspace.session_dir(id).exists() {
                return id;
            }
        }
    }

    /// Snapshot of the session, if it is still live.
    pub fn get(&self, id: Uuid) -> Option<Session> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.sessions.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to the live session in one step.
    pub fn update<R>(&self, id: Uuid, f: impl FnOnce(&mut Session) -> R) -> CancelResult<R> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or(CancelError::SessionNotFound(id))?;
        Ok(f(session))
    }

    pub fn touch(&self, id: Uuid) -> CancelResult<()> {
        self.update(id, Session::touch)
    }

    /// Move the session forward to `next` and record activity.
    ///
    /// Backward moves are ignored so a late chat reply cannot pull a finished
    /// session back into review. Returns the resulting state.
    pub fn transition(&self, id: Uuid, next: SessionState) -> CancelResult<SessionState> {
        self.update(id, |session| {
            if session.state.can_transition_to(next) {
                if session.state != next {
                    debug!(session_id = %id, from = %session.state, to = %next, "State transition");
                }
                session.state = next;
            } else {
                warn!(session_id = %id, from = %session.state, to = %next, "Ignoring backward transition");
            }
            session.touch();
            session.state
        })
    }

    /// Write the uploaded artifact into the session directory.
    ///
    /// The first saved path is the one recorded on the session.
    pub async fn save_artifact(&self, id: Uuid, bytes: &[u8], name: &str) -> CancelResult<PathBuf> {
        let session = self.get(id).ok_or(CancelError::SessionNotFound(id))?;
        let path = self
            .workspace
            .save_artifact(&session.working_dir, bytes, name)
            .await?;
        let recorded = self.update(id, |s| {
            s.touch();
            s.artifact_path.get_or_insert_with(|| path.clone()).clone()
        })?;
        info!(session_id = %id, artifact = %recorded.display(), bytes = bytes.len(), "Saved artifact");
        Ok(recorded)
    }

    /// Contents of the recorded artifact, or `None` if nothing was uploaded.
    pub async fn read_artifact(&self, id: Uuid) -> CancelResult<Option<String>> {
        let session = self.get(id).ok_or(CancelError::SessionNotFound(id))?;
        match session.artifact_path {
            Some(path) => Ok(Some(self.workspace.read_artifact(&path).await?)),
            None => Ok(None),
        }
    }

    /// Run `task` against the session's directory, serialized with every
    /// other task for the same session.
    ///
    /// Fails with [`CancelError::SessionNotFound`] if the session is gone at
    /// submission time. The task receives a snapshot of the session.
    ///
    /// The registry read guard is held while the task joins the queue, so a
    /// concurrent `destroy` either rejects it or drains it before teardown.
    /// Lock order is registry, then serializer.
    pub fn enqueue<F, Fut, T>(
        &self,
        id: Uuid,
        task: F,
    ) -> impl Future<Output = CancelResult<T>> + Send + 'static
    where
        F: FnOnce(Session) -> Fut + Send + 'static,
        Fut: Future<Output = CancelResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let queued = {
            let sessions = self.sessions.read();
            sessions
                .get(&id)
                .cloned()
                .map(|session| self.serializer.enqueue(id, move || task(session)))
        };
        async move {
            match queued {
                Some(queued) => queued.await,
                None => Err(CancelError::SessionNotFound(id)),
            }
        }
    }

    /// Remove the session. Idempotent.
    ///
    /// The registry entry is gone as soon as this returns, before the
    /// returned future is polled. The future waits for queued work to drain
    /// and then deletes the directory; it never fails.
    pub fn destroy(&self, id: Uuid) -> impl Future<Output = ()> + Send + 'static {
        let removed = self.sessions.write().remove(&id);
        let cleanup = removed.map(|_| {
            info!(session_id = %id, "Session removed");
            (self.serializer.clone(), self.workspace.clone())
        });
        async move {
            if let Some((serializer, workspace)) = cleanup {
                serializer.drain(id).await;
                workspace.teardown(id).await;
            }
        }
    }

    /// Diagnostic listing of live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let now = Utc::now();
        let sessions = self.sessions.read();
        let mut live: Vec<&Session> = sessions.values().collect();
        live.sort_by_key(|s| s.created_at);
        live.into_iter().map(|s| s.summary(now)).collect()
    }

    /// Destroy every session idle for longer than `max_age`.
    ///
    /// Returns the ids that were destroyed.
    pub async fn sweep(&self, max_age: Duration) -> Vec<Uuid> {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let stale: Vec<Uuid> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.idle_for(now) > max_age)
            .map(|s| s.id)
            .collect();

        if stale.is_empty() {
            return stale;
        }

        info!(count = stale.len(), "Reaping stale sessions");
        let cleanups: Vec<_> = stale.iter().map(|id| tokio::spawn(self.destroy(*id))).collect();
        for (id, cleanup) in stale.iter().zip(cleanups) {
            if let Err(e) = cleanup.await {
                warn!(session_id = %id, error = %e, "Session cleanup task failed");
            }
        }
        stale
    }

    /// Destroy every live session and wait for all cleanups.
    pub async fn destroy_all(&self) -> usize {
        let ids: Vec<Uuid> = self.sessions.read().keys().copied().collect();
        let cleanups: Vec<_> = ids.iter().map(|id| self.destroy(*id)).collect();
        futures_util::future::join_all(cleanups).await;
        ids.len()
    }
}
