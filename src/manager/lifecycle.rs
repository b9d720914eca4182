//! Shutdown coordination.

use crate::error::Result;
use crate::types::{Event, TaskId, TaskStatus};
use std::sync::atomic::Ordering;

use super::TaskQueue;

impl TaskQueue {
    /// Shut the queue down
    ///
    /// The sequence is:
    /// 1. stop accepting new tasks and stop the admission loop
    /// 2. cancel every running job and mark its task `Paused`
    /// 3. persist the final snapshot
    /// 4. emit [`Event::Shutdown`]
    ///
    /// Running jobs are abandoned rather than awaited; their partial bytes
    /// are discarded and the tasks can be retried after a restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the final snapshot cannot be written. The queue
    /// is stopped either way.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating shutdown");

        self.accepting_new.store(false, Ordering::SeqCst);
        // the loop sees the cleared flag on its next wake-up and exits
        self.wake.notify_one();

        let mut state = self.state.lock().await;
        let interrupted: Vec<TaskId> = state.active.keys().copied().collect();
        for (id, run) in state.active.drain() {
            tracing::debug!(task_id = %id, run_id = run.run_id, "Cancelling job");
            run.token.cancel();
        }

        for id in &interrupted {
            if let Some(task) = state.task_mut(*id) {
                task.status = TaskStatus::Paused;
                task.speed = None;
            }
            self.emit_event(Event::Paused { id: *id });
        }
        tracing::info!(interrupted = interrupted.len(), "Paused running tasks");

        let persisted = self.persist(&mut state).await;
        drop(state);

        match &persisted {
            Ok(()) => tracing::info!("Final state persisted"),
            Err(e) => tracing::error!(error = %e, "Failed to persist final state during shutdown"),
        }

        self.emit_event(Event::Shutdown);
        tracing::info!("Shutdown complete");
        persisted
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        !self.accepting_new.load(Ordering::SeqCst)
    }
}
