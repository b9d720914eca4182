//! Retry, cancel, remove and bulk clear of tasks.

use crate::error::{Error, Result, TaskError};
use crate::job::JobState;
use crate::types::{Event, TaskId, TaskStatus};

use super::TaskQueue;

impl TaskQueue {
    /// Re-queue a failed or paused task
    ///
    /// Progress and the last error are cleared and the task goes back to
    /// `Pending`. Calling this on a task in any other state changes nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for an unknown ID.
    pub async fn retry(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let task = state
            .task_mut(id)
            .ok_or(Error::Task(TaskError::NotFound { id }))?;

        if !matches!(task.status, TaskStatus::Failed | TaskStatus::Paused) {
            tracing::debug!(task_id = %id, status = %task.status, "Retry ignored");
            return Ok(());
        }

        tracing::info!(task_id = %id, from = %task.status, "Retrying task");
        task.status = TaskStatus::Pending;
        task.reset_progress();

        self.emit_event(Event::StatusChanged {
            id,
            status: TaskStatus::Pending,
            label: JobState::Pending.label(0),
        });
        let persisted = self.persist(&mut state).await;
        drop(state);

        // the task is queued whether or not the snapshot was written
        self.wake.notify_one();
        persisted
    }

    /// Pause a pending or running task
    ///
    /// A running job is abandoned: its network calls are cancelled, its
    /// remaining events are ignored, and its slot is released immediately.
    /// Cancelling a paused task is a no-op.
    ///
    /// # Errors
    ///
    /// - [`TaskError::NotFound`] for an unknown ID
    /// - [`TaskError::InvalidState`] for completed or failed tasks
    pub async fn cancel(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let status = state
            .task(id)
            .ok_or(Error::Task(TaskError::NotFound { id }))?
            .status;

        match status {
            TaskStatus::Paused => return Ok(()),
            TaskStatus::Completed | TaskStatus::Failed => {
                return Err(Error::Task(TaskError::InvalidState {
                    id,
                    operation: "cancel".to_string(),
                    current_state: status.to_string(),
                }));
            }
            TaskStatus::Pending
            | TaskStatus::Parsing
            | TaskStatus::Fetching
            | TaskStatus::Merging
            | TaskStatus::Delivering => {}
        }

        if let Some(run) = state.active.remove(&id) {
            run.token.cancel();
            tracing::debug!(task_id = %id, run_id = run.run_id, "Cancelled running job");
        }

        if let Some(task) = state.task_mut(id) {
            task.status = TaskStatus::Paused;
            task.speed = None;
        }
        tracing::info!(task_id = %id, from = %status, "Task paused");

        self.emit_event(Event::Paused { id });
        let persisted = self.persist(&mut state).await;
        drop(state);

        // the slot is free whether or not the snapshot was written
        self.wake.notify_one();
        persisted
    }

    /// Delete a task regardless of its state
    ///
    /// A running job is cancelled and its slot released first. An artifact
    /// still held in memory for the task is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::NotFound`] for an unknown ID.
    pub async fn remove(&self, id: TaskId) -> Result<()> {
        let mut state = self.state.lock().await;
        let position = state
            .tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(Error::Task(TaskError::NotFound { id }))?;

        if let Some(run) = state.active.remove(&id) {
            run.token.cancel();
        }
        state.tasks.remove(position);
        state.overrides.remove(&id);
        let held = state.deliveries.remove(&id);
        tracing::info!(task_id = %id, "Task removed");

        self.emit_event(Event::Removed { id });
        let persisted = self.persist(&mut state).await;
        drop(state);

        self.wake.notify_one();
        self.release_deliveries(held.into_iter().collect()).await;
        persisted
    }

    /// Remove every completed task, returning how many were removed
    ///
    /// Unclaimed in-memory artifacts of the removed tasks are dropped.
    pub async fn clear_completed(&self) -> Result<usize> {
        let mut state = self.state.lock().await;

        let removed: Vec<TaskId> = state
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Completed)
            .map(|t| t.id)
            .collect();
        if removed.is_empty() {
            return Ok(0);
        }

        state.tasks.retain(|t| t.status != TaskStatus::Completed);
        let mut held = Vec::new();
        for id in &removed {
            state.overrides.remove(id);
            held.extend(state.deliveries.remove(id));
            self.emit_event(Event::Removed { id: *id });
        }
        tracing::info!(count = removed.len(), "Cleared completed tasks");

        let persisted = self.persist(&mut state).await;
        drop(state);

        self.release_deliveries(held).await;
        persisted.map(|()| removed.len())
    }
}
