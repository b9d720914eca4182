//! Task submission, restore and read access.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::types::{Episode, Event, QueueStats, Task, TaskId, TaskSpec, TaskStatus};
use crate::utils::sanitize_filename;
use std::sync::atomic::Ordering;

use super::{QueueState, TaskQueue};

impl TaskQueue {
    /// Add a task to the queue
    ///
    /// The task starts as `Pending` and is picked up by the admission loop as
    /// soon as a slot is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] after [`shutdown`](Self::shutdown).
    /// A failed snapshot write is logged; the task is queued regardless.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use hls_dl::*;
    /// # async fn example(queue: TaskQueue) -> Result<()> {
    /// let id = queue
    ///     .add_task(TaskSpec::new("Trailer", "https://cdn.example/trailer/index.m3u8", "trailer.mp4"))
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_task(&self, spec: TaskSpec) -> Result<TaskId> {
        self.add_task_with(spec, Settings::default()).await
    }

    /// Add a task whose run uses `overrides` on top of the stored settings
    pub async fn add_task_with(&self, spec: TaskSpec, overrides: Settings) -> Result<TaskId> {
        let mut ids = self.insert_tasks(vec![(spec, overrides)]).await?;
        ids.pop()
            .ok_or_else(|| Error::Other("task insertion returned no id".into()))
    }

    /// Add several tasks at once, in order
    ///
    /// All tasks are inserted and persisted under one lock, so the batch
    /// appears atomically to subscribers and storage.
    pub async fn add_batch(&self, specs: Vec<TaskSpec>) -> Result<Vec<TaskId>> {
        self.insert_tasks(
            specs
                .into_iter()
                .map(|spec| (spec, Settings::default()))
                .collect(),
        )
        .await
    }

    /// Add the selected episodes of a series as a batch
    ///
    /// See [`TaskSpec::from_episodes`] for naming and skipping rules.
    pub async fn add_episodes(
        &self,
        title: &str,
        episodes: &[Episode],
        selected: &[usize],
    ) -> Result<Vec<TaskId>> {
        self.add_batch(TaskSpec::from_episodes(title, episodes, selected))
            .await
    }

    async fn insert_tasks(&self, specs: Vec<(TaskSpec, Settings)>) -> Result<Vec<TaskId>> {
        if !self.accepting_new.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        let mut state = self.state.lock().await;
        let mut ids = Vec::with_capacity(specs.len());

        for (mut spec, overrides) in specs {
            if spec.filename.trim().is_empty() {
                spec.filename = format!("{}.mp4", sanitize_filename(&spec.title));
            }

            let id = TaskId(state.next_id);
            state.next_id += 1;
            let title = spec.title.clone();

            tracing::info!(task_id = %id, url = %spec.url, filename = %spec.filename, "Task queued");
            state.tasks.push(Task::new(id, spec));
            if !overrides.is_empty() {
                state.overrides.insert(id, overrides);
            }
            self.emit_event(Event::Queued { id, title });
            ids.push(id);
        }

        // the tasks are queued and will run; a failed write is retried by the next persist
        self.persist_logged(&mut state).await;
        drop(state);

        self.wake.notify_one();
        Ok(ids)
    }

    /// Load persisted tasks into the queue on startup
    ///
    /// Tasks that were running, or pending with partial progress, come back
    /// as `Paused`: their in-flight bytes were never stored. Plain pending
    /// tasks stay `Pending` and are admitted normally.
    pub(crate) async fn restore(&self, persisted: Vec<Task>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut tasks = persisted;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut interrupted = 0usize;
        for task in &mut tasks {
            let mid_flight = task.status.is_active()
                || (task.status == TaskStatus::Pending && task.was_mid_flight());
            if mid_flight {
                tracing::info!(
                    task_id = %task.id,
                    status = %task.status,
                    "Task was interrupted, restoring as paused"
                );
                task.status = TaskStatus::Paused;
                task.speed = None;
                interrupted += 1;
            }
        }

        state.next_id = tasks.iter().map(|t| t.id.get()).max().unwrap_or(0) + 1;
        tracing::info!(restored = tasks.len(), interrupted, "Restored persisted tasks");
        state.tasks = tasks;

        if interrupted > 0 {
            self.persist(&mut state).await?;
        }
        Ok(())
    }

    /// Get a task by ID
    pub async fn get_task(&self, id: TaskId) -> Option<Task> {
        self.state.lock().await.task(id).cloned()
    }

    /// List all tasks in insertion order
    pub async fn list_tasks(&self) -> Vec<Task> {
        self.state.lock().await.tasks.clone()
    }

    /// Count tasks per status
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        count_statuses(&state)
    }
}

fn count_statuses(state: &QueueState) -> QueueStats {
    let mut stats = QueueStats::default();
    for task in &state.tasks {
        match task.status {
            TaskStatus::Pending => stats.pending += 1,
            TaskStatus::Paused => stats.paused += 1,
            TaskStatus::Completed => stats.completed += 1,
            TaskStatus::Failed => stats.failed += 1,
            TaskStatus::Parsing
            | TaskStatus::Fetching
            | TaskStatus::Merging
            | TaskStatus::Delivering => stats.active += 1,
        }
    }
    stats
}
