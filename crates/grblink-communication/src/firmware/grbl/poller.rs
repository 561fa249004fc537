//! Background status polling.
//!
//! Spawns a tokio task that calls [`GrblController::qstatus`] on a fixed
//! interval. Each query runs on the blocking pool because the session does
//! synchronous serial I/O. A fatal error stops the poller and is kept for
//! inspection.

use grblink_core::{thread_safe_none, ThreadSafeOption};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use super::controller::GrblController;

/// Handle to a running status poll task
pub struct StatusPoller {
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    last_error: ThreadSafeOption<String>,
    polls: Arc<AtomicU64>,
}

impl StatusPoller {
    /// Start polling. Must be called from within a tokio runtime.
    pub fn spawn(controller: Arc<GrblController>, interval: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let last_error = thread_safe_none();
        let polls = Arc::new(AtomicU64::new(0));

        let task_error = last_error.clone();
        let task_polls = polls.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!("Status poller shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let c = controller.clone();
                        match tokio::task::spawn_blocking(move || c.qstatus()).await {
                            Ok(Ok(_)) => {
                                task_polls.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(Err(e)) if e.is_fatal() => {
                                error!(error = %e, "Status polling stopped");
                                *task_error.lock() = Some(e.to_string());
                                break;
                            }
                            Ok(Err(e)) => {
                                warn!(error = %e, "Status poll failed");
                                *task_error.lock() = Some(e.to_string());
                            }
                            Err(e) => {
                                error!(error = %e, "Status poll task panicked");
                                *task_error.lock() = Some(e.to_string());
                                break;
                            }
                        }
                    }
                }
            }
        });

        Self {
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            last_error,
            polls,
        }
    }

    /// True while the poll task is alive
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Successful polls so far
    pub fn poll_count(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }

    /// Most recent poll error
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Stop polling and wait for the task to exit
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Status poller ended abnormally");
            }
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
