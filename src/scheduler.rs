//! Cancellable periodic-task primitive.
//!
//! [`PeriodicTask`] repeatedly invokes an action at a fixed interval on a
//! background tokio task, independent of the caller. Ticks never overlap:
//! the task is single and runs the action to completion before awaiting the
//! next interval tick (missed ticks are skipped, not queued). The action is
//! responsible for its own fault containment; a failing invocation must
//! not take the schedule down.

use std::time::Duration;

use log::debug;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a repeating background task.
pub struct PeriodicTask {
    label: String,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn a task invoking `action` every `period`, starting immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(label: impl Into<String>, period: Duration, mut action: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let label = label.into();
        let (shutdown, mut stop) = watch::channel(false);
        let task_label = label.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = ticker.tick() => action(),
                }
            }
            debug!("periodic task '{task_label}' stopped");
        });
        debug!("periodic task '{label}' started (period {period:?})");
        Self { label, shutdown, handle }
    }

    /// Stop further invocations. Idempotent; an action already in progress
    /// completes.
    pub fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Whether the background task is still scheduled.
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Label the task was spawned with.
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel();
    }
}
