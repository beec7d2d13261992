//! Per-session FIFO execution.
//!
//! The assistant keeps its conversation state inside the session directory,
//! so two calls against the same session must never overlap. Each session id
//! maps to a *tail*: a shared future that completes once every unit of work
//! submitted so far has settled. Enqueueing swaps in a new tail that waits
//! for the old one and then for the new unit.

use cancelstuff_core::{CancelError, CancelResult};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

type Tail = Shared<BoxFuture<'static, ()>>;

/// Default bound on a single unit of work.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Guarantees at most one in-flight unit of work per session.
pub struct RequestSerializer {
    tails: Mutex<HashMap<Uuid, Tail>>,
    task_timeout: Duration,
}

impl RequestSerializer {
    pub fn new(task_timeout: Duration) -> Self {
        Self {
            tails: Mutex::new(HashMap::new()),
            task_timeout,
        }
    }

    pub fn task_timeout(&self) -> Duration {
        self.task_timeout
    }

    /// Queue `task` behind everything already submitted for `session_id`.
    ///
    /// The queue position is taken when this is called, not when the returned
    /// future is first polled. The task runs on its own tokio task, so
    /// dropping the returned future does not cancel it. A task that exceeds
    /// the timeout is dropped (killing any child process it owns) and its
    /// waiter gets [`CancelError::Timeout`]. Errors, panics and timeouts are
    /// delivered only to this task's waiter; the next task starts regardless.
    pub fn enqueue<F, Fut, T>(
        &self,
        session_id: Uuid,
        task: F,
    ) -> impl Future<Output = CancelResult<T>> + Send + 'static
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = CancelResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel::<()>();
        let previous = self.push_tail(session_id, done_rx);
        let timeout = self.task_timeout;

        let handle = tokio::spawn(async move {
            if let Some(previous) = previous {
                previous.await;
            }
            // Dropped when this block exits, including on panic.
            let _done = done_tx;

            debug!(session_id = %session_id, "Serialized task started");
            match tokio::time::timeout(timeout, task()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        session_id = %session_id,
                        timeout_secs = timeout.as_secs(),
                        "Serialized task timed out"
                    );
                    Err(CancelError::Timeout(timeout))
                }
            }
        });

        async move {
            handle
                .await
                .map_err(|e| CancelError::Task(format!("queued task failed: {e}")))?
        }
    }

    /// Wait until every task submitted for `session_id` has settled, then
    /// forget the session's tail.
    ///
    /// If more work is queued while waiting, waits for that too.
    pub async fn drain(&self, session_id: Uuid) {
        while let Some(tail) = self.tail(session_id) {
            tail.clone().await;
            if self.remove_if_current(session_id, &tail) {
                debug!(session_id = %session_id, "Serializer queue drained");
                return;
            }
        }
    }

    /// Number of sessions with a retained tail entry.
    pub fn tracked_sessions(&self) -> usize {
        self.tails.lock().len()
    }

    fn push_tail(&self, session_id: Uuid, done: oneshot::Receiver<()>) -> Option<Tail> {
        let mut tails = self.tails.lock();
        let previous = tails.get(&session_id).cloned();
        let chained = previous.clone();
        let tail = async move {
            if let Some(chained) = chained {
                chained.await;
            }
            let _ = done.await;
        }
        .boxed()
        .shared();
        tails.insert(session_id, tail);
        previous
    }

    fn tail(&self, session_id: Uuid) -> Option<Tail> {
        self.tails.lock().get(&session_id).cloned()
    }

    /// Returns `true` when there is nothing left to wait for.
    fn remove_if_current(&self, session_id: Uuid, tail: &Tail) -> bool {
        let mut tails = self.tails.lock();
        match tails.get(&session_id).map(|current| current.ptr_eq(tail)) {
            Some(true) => {
                tails.remove(&session_id);
                true
            }
            Some(false) => false,
            None => true,
        }
    }
}

impl Default for RequestSerializer {
    fn default() -> Self {
        Self::new(DEFAULT_TASK_TIMEOUT)
    }
}
