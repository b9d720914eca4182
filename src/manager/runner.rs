//! Job spawning and bridging of job events into queue state.

use crate::config::Config;
use crate::job::{FetchJob, JobEvent, JobOutcome, JobState};
use crate::types::{Event, TaskId, TaskStatus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::TaskQueue;

impl TaskQueue {
    /// Spawn the job for an admitted task together with its event bridge
    ///
    /// The bridge applies job events to the task while `run_id` is still the
    /// registered run; once the task was cancelled, removed or re-admitted,
    /// the remaining events of the old run are dropped.
    pub(crate) fn spawn_job(
        &self,
        id: TaskId,
        run_id: u64,
        url: String,
        filename: String,
        config: Config,
        cancel: CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut job = FetchJob::new(
            id,
            url,
            filename,
            config,
            self.transport.clone(),
            self.sink.clone(),
            tx,
        );
        let queue = self.clone();

        tokio::spawn(async move {
            let handle = tokio::spawn(async move { job.run(cancel).await });

            while let Some(event) = rx.recv().await {
                queue.apply_job_event(id, run_id, event).await;
            }

            match handle.await {
                Ok(outcome) => queue.finish_run(id, run_id, outcome, None).await,
                Err(e) => {
                    tracing::error!(task_id = %id, error = %e, "Job task panicked");
                    queue
                        .finish_run(id, run_id, JobOutcome::Failed, Some(e.to_string()))
                        .await;
                }
            }
        });
    }

    /// Apply one job event to the task, if the run is still current
    pub(crate) async fn apply_job_event(&self, id: TaskId, run_id: u64, event: JobEvent) {
        let mut state = self.state.lock().await;
        if !state.is_current_run(id, run_id) {
            tracing::trace!(task_id = %id, run_id, "Ignoring event from abandoned run");
            return;
        }
        let Some(task) = state.task_mut(id) else {
            return;
        };

        match event {
            JobEvent::State {
                state: job_state,
                label,
                total,
            } => {
                if job_state.is_terminal() {
                    // reported by the Completed/Failed events that follow
                    return;
                }
                task.status = job_state.task_status();
                task.total = total;
                self.emit_event(Event::StatusChanged {
                    id,
                    status: task.status,
                    label,
                });
                self.persist_logged(&mut state).await;
            }
            JobEvent::Progress { progress, speed } => {
                task.loaded = progress.completed;
                task.total = progress.total;
                task.failed = progress.failed;
                task.progress = if progress.total == 0 {
                    0.0
                } else {
                    (progress.completed as f32 / progress.total as f32) * 100.0
                };
                task.speed = Some(speed.clone());
                self.emit_event(Event::Progress {
                    id,
                    completed: progress.completed,
                    total: progress.total,
                    percent: progress.percent,
                    bytes: progress.bytes,
                    speed,
                    label: format!(
                        "Downloading {}/{} segments",
                        progress.completed, progress.total
                    ),
                });
                self.persist_throttled(&mut state).await;
            }
            JobEvent::SegmentFailed { index, url, error } => {
                self.emit_event(Event::SegmentFailed {
                    id,
                    index,
                    url,
                    error: error.to_string(),
                });
            }
            JobEvent::Completed {
                filename,
                size,
                segment_count,
                delivery,
            } => {
                task.status = TaskStatus::Completed;
                task.progress = 100.0;
                task.error = None;
                task.speed = None;
                task.completed_at = Some(chrono::Utc::now().timestamp());
                state.active.remove(&id);
                state.deliveries.insert(id, delivery.clone());
                tracing::info!(task_id = %id, size, segment_count, "Task completed");

                self.emit_event(Event::StatusChanged {
                    id,
                    status: TaskStatus::Completed,
                    label: JobState::Completed.label(segment_count),
                });
                self.emit_event(Event::Completed {
                    id,
                    filename,
                    size,
                    segment_count,
                    delivery,
                });
                self.persist_logged(&mut state).await;
                drop(state);
                self.wake.notify_one();
            }
            JobEvent::Failed {
                error,
                failed_segments,
            } => {
                task.status = TaskStatus::Failed;
                task.error = Some(error.clone());
                task.speed = None;
                state.active.remove(&id);
                tracing::warn!(task_id = %id, error = %error, "Task failed");

                self.emit_event(Event::StatusChanged {
                    id,
                    status: TaskStatus::Failed,
                    label: JobState::Failed.label(0),
                });
                self.emit_event(Event::Failed {
                    id,
                    error,
                    failed_segments,
                });
                self.persist_logged(&mut state).await;
                drop(state);
                self.wake.notify_one();
            }
        }
    }

    /// Release a run that ended without reporting a terminal event
    ///
    /// Normally the terminal event already released the slot and this is a
    /// no-op. A run that is still registered here ended abnormally and is
    /// marked failed.
    pub(crate) async fn finish_run(
        &self,
        id: TaskId,
        run_id: u64,
        outcome: JobOutcome,
        panic_message: Option<String>,
    ) {
        let mut state = self.state.lock().await;
        if !state.is_current_run(id, run_id) {
            return;
        }
        state.active.remove(&id);

        let error = panic_message
            .unwrap_or_else(|| format!("job ended without a result ({outcome:?})"));
        if let Some(task) = state.task_mut(id) {
            task.status = TaskStatus::Failed;
            task.error = Some(error.clone());
            task.speed = None;
        }
        tracing::error!(task_id = %id, run_id, error = %error, "Run ended abnormally");

        self.emit_event(Event::Failed {
            id,
            error,
            failed_segments: None,
        });
        self.persist_logged(&mut state).await;
        drop(state);

        self.wake.notify_one();
    }
}
