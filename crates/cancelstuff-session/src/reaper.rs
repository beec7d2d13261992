use crate::store::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);
/// Default idle time after which a session is reaped.
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(30 * 60);

/// Background sweep that destroys sessions idle beyond a threshold.
pub struct Reaper;

impl Reaper {
    /// Start sweeping `store` every `interval`.
    ///
    /// The first sweep happens one full interval after start.
    pub fn spawn(store: Arc<SessionStore>, interval: Duration, max_idle: Duration) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(
                interval_secs = interval.as_secs(),
                max_idle_secs = max_idle.as_secs(),
                "Session reaper started"
            );
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let reaped = store.sweep(max_idle).await;
                        debug!(reaped = reaped.len(), live = store.len(), "Sweep finished");
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
            info!("Session reaper stopped");
        });
        ReaperHandle {
            shutdown: Some(shutdown_tx),
            task,
        }
    }
}

/// Stops the reaper when asked to, or when dropped.
pub struct ReaperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    /// Stop the reaper and wait for an in-progress sweep to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}
