//! Detached background work with recorded outcomes.
//!
//! Cache-fill writes must never hold up the response they were copied from.
//! They run as detached tokio tasks; failures are logged and recorded here
//! instead of being propagated to the request that spawned them.

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOutcome {
    pub label: String,
    /// `Err` carries the rendered error.
    pub result: Result<(), String>,
}

impl TaskOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct BackgroundTasks {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    tx: mpsc::UnboundedSender<TaskOutcome>,
    rx: Mutex<mpsc::UnboundedReceiver<TaskOutcome>>,
}

/// Decrements the in-flight count even if the task panics.
struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Spawn and forget; the outcome is logged and recorded.
    pub fn spawn<F, E>(&self, label: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Display,
    {
        let label = label.into();
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            idle: Arc::clone(&self.idle),
        };
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let result = match task.await {
                Ok(()) => {
                    debug!(task = %label, "Background task complete");
                    Ok(())
                }
                Err(e) => {
                    warn!(task = %label, error = %e, "Background task failed");
                    Err(e.to_string())
                }
            };
            // Receiver lives as long as self; a send error means we are shutting down.
            let _ = tx.send(TaskOutcome { label, result });
        });
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every spawned task has finished.
    pub async fn settle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Collect outcomes recorded since the last drain.
    pub fn drain_outcomes(&self) -> Vec<TaskOutcome> {
        let mut rx = self.rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut outcomes = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }
}
