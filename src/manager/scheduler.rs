//! Admission loop promoting pending tasks while slots are free.

use crate::error::{Error, Result};
use crate::types::TaskStatus;
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;

use super::{ActiveRun, QueueState, TaskQueue};

impl TaskQueue {
    /// Start the admission loop task
    ///
    /// The loop sleeps until woken, then admits pending tasks in insertion
    /// order while fewer than `max_concurrent_downloads` are active. Every
    /// trigger (new task, completion, failure, cancel, settings change) only
    /// wakes the loop, so admission has a single owner.
    pub(crate) fn start_admission_loop(&self) {
        let queue = self.clone();

        tokio::spawn(async move {
            loop {
                queue.wake.notified().await;

                if !queue.accepting_new.load(Ordering::SeqCst) {
                    tracing::debug!("Admission loop stopping");
                    break;
                }

                if let Err(e) = queue.admit_pending().await {
                    tracing::error!(error = %e, "Admission pass failed");
                }
            }
        });
    }

    /// One admission pass under the state lock
    pub(crate) async fn admit_pending(&self) -> Result<usize> {
        let mut state = self.state.lock().await;
        let ceiling = self
            .config
            .effective(&state.stored_settings, &Default::default())
            .download
            .max_concurrent_downloads;

        check_slots(&state)?;

        let mut admitted = 0;
        while state.active.len() < ceiling && self.accepting_new.load(Ordering::SeqCst) {
            let Some(position) = state
                .tasks
                .iter()
                .position(|t| t.status == TaskStatus::Pending)
            else {
                break;
            };
            self.start_task(&mut state, position);
            admitted += 1;
        }

        if admitted > 0 {
            tracing::debug!(admitted, active = state.active.len(), ceiling, "Admitted tasks");
            self.persist(&mut state).await?;
        }
        Ok(admitted)
    }

    /// Register the task at `position` as active and spawn its job
    fn start_task(&self, state: &mut QueueState, position: usize) {
        let run_id = state.next_run;
        state.next_run += 1;
        let token = CancellationToken::new();

        let task = &mut state.tasks[position];
        let id = task.id;
        task.status = TaskStatus::Parsing;
        task.reset_progress();
        let (url, filename) = (task.url.clone(), task.filename.clone());

        let overrides = state.overrides.get(&id).cloned().unwrap_or_default();
        let config = self.config.effective(&state.stored_settings, &overrides);

        state.active.insert(
            id,
            ActiveRun {
                token: token.clone(),
                run_id,
            },
        );

        // the job's own Parsing transition announces the status change
        tracing::info!(task_id = %id, run_id, "Task admitted");
        self.spawn_job(id, run_id, url, filename, config, token);
    }
}

/// The active map and the active task statuses must describe the same set
fn check_slots(state: &QueueState) -> Result<()> {
    let active_tasks = state.tasks.iter().filter(|t| t.status.is_active()).count();
    let registered = state
        .active
        .keys()
        .filter(|id| state.task(**id).is_some_and(|t| t.status.is_active()))
        .count();

    if active_tasks != state.active.len() || registered != state.active.len() {
        let message = format!(
            "{} active tasks but {} registered runs",
            active_tasks,
            state.active.len()
        );
        tracing::error!(%message, "Active slot bookkeeping out of sync");
        return Err(Error::SchedulingViolation(message));
    }
    Ok(())
}
