//! Task queue (download manager) split into focused submodules.
//!
//! The `TaskQueue` struct and its methods are organized by domain:
//! - [`queue`] - Task submission, restore and read access
//! - [`control`] - Retry, cancel, remove and bulk clear
//! - [`scheduler`] - The admission loop holding the concurrency ceiling
//! - [`runner`] - Job spawning and job-event bridging
//! - [`settings`] - Stored settings and the effective configuration
//! - [`lifecycle`] - Shutdown coordination

mod control;
mod lifecycle;
mod queue;
mod runner;
mod scheduler;
mod settings;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::{Config, Settings};
use crate::db::Database;
use crate::error::Result;
use crate::fetcher::{ReqwestTransport, Transport};
use crate::sink::{Delivery, EphemeralArtifact, EphemeralSink, FallbackSink, OutputSink};
use crate::store::{TaskStore, snapshot};
use crate::types::{Event, Task, TaskId};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, broadcast};
use tokio_util::sync::CancellationToken;

/// Minimum interval between progress-driven snapshot writes
const PROGRESS_PERSIST_INTERVAL: Duration = Duration::from_secs(1);

/// A running job registered in the active map
pub(crate) struct ActiveRun {
    /// Cancels the job's network activity
    pub(crate) token: CancellationToken,
    /// Generation number; events carrying an older number are ignored
    pub(crate) run_id: u64,
}

/// Task list and active-slot state
///
/// Every read-then-write of the task list or the active map happens while
/// holding the one mutex around this struct.
pub(crate) struct QueueState {
    /// All tasks in insertion order
    pub(crate) tasks: Vec<Task>,
    /// Tasks currently occupying a concurrency slot
    pub(crate) active: HashMap<TaskId, ActiveRun>,
    /// Per-call setting overrides, kept for the lifetime of the task
    pub(crate) overrides: HashMap<TaskId, Settings>,
    /// Where each completed task's artifact went, for releasing held bytes
    pub(crate) deliveries: HashMap<TaskId, Delivery>,
    /// Stored settings overlay
    pub(crate) stored_settings: Settings,
    /// Next task ID
    pub(crate) next_id: i64,
    /// Next run generation
    pub(crate) next_run: u64,
    /// Last time a snapshot was written
    pub(crate) last_persist: Instant,
}

impl QueueState {
    pub(crate) fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Whether `run_id` is the registered run for `id`
    pub(crate) fn is_current_run(&self, id: TaskId, run_id: u64) -> bool {
        self.active.get(&id).is_some_and(|run| run.run_id == run_id)
    }
}

/// Main task queue instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct TaskQueue {
    /// Task list and active slots behind the single serialization point
    pub(crate) state: Arc<Mutex<QueueState>>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Built-in defaults, before stored settings and overrides
    pub(crate) config: Arc<Config>,
    /// Persistence backend
    pub(crate) store: Arc<dyn TaskStore>,
    /// Network transport shared by all jobs
    pub(crate) transport: Arc<dyn Transport>,
    /// Destination for finished artifacts
    pub(crate) sink: Arc<dyn OutputSink>,
    /// Ephemeral side of the default sink, when the queue built it
    pub(crate) ephemeral: Option<Arc<EphemeralSink>>,
    /// Wakes the admission loop
    pub(crate) wake: Arc<Notify>,
    /// Flag to indicate whether new tasks are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
}

impl TaskQueue {
    /// Create a queue with the production stack
    ///
    /// This initializes:
    /// - the SQLite database at `persistence.database_path`
    /// - a `reqwest` transport without cookies
    /// - a directory sink for `download.output_dir` with ephemeral fallback
    ///
    /// Persisted tasks are reloaded; any that were mid-flight come back `Paused`.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        if let Some(dir) = &config.download.output_dir {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                crate::Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create output directory '{}': {}",
                        dir.display(),
                        e
                    ),
                ))
            })?;
        }

        let db = Database::new(&config.persistence.database_path).await?;
        let transport = ReqwestTransport::new(config.download.user_agent.as_deref())?;

        // the sink's collision policy follows the stored autoRename setting at startup
        let stored = db.load_settings().await?;
        let startup = config.effective(&stored, &Settings::default());
        let ephemeral = Arc::new(EphemeralSink::new());
        let sink = FallbackSink::from_config(&startup.download, ephemeral.clone());

        let mut queue =
            Self::with_components(config, Arc::new(db), Arc::new(transport), Arc::new(sink))
                .await?;
        queue.ephemeral = Some(ephemeral);
        Ok(queue)
    }

    /// Create a queue from explicit storage, transport and sink
    pub async fn with_components(
        config: Config,
        store: Arc<dyn TaskStore>,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self> {
        config.validate()?;

        let stored_settings = store.load_settings().await?;
        let persisted = store.load_tasks().await?;

        // Create broadcast channel with buffer size of 1000 events
        let (event_tx, _rx) = broadcast::channel(1000);

        let state = QueueState {
            tasks: Vec::new(),
            active: HashMap::new(),
            overrides: HashMap::new(),
            deliveries: HashMap::new(),
            stored_settings,
            next_id: 1,
            next_run: 1,
            last_persist: Instant::now(),
        };

        let queue = Self {
            state: Arc::new(Mutex::new(state)),
            event_tx,
            config: Arc::new(config),
            store,
            transport,
            sink,
            ephemeral: None,
            wake: Arc::new(Notify::new()),
            accepting_new: Arc::new(AtomicBool::new(true)),
        };

        queue.restore(persisted).await?;
        queue.start_admission_loop();
        queue.wake.notify_one();

        Ok(queue)
    }

    /// Subscribe to task events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Claim an artifact held by the default ephemeral sink
    ///
    /// Returns `None` when the key is unknown or the queue was built with a
    /// custom sink.
    pub async fn take_artifact(&self, key: &str) -> Option<EphemeralArtifact> {
        match &self.ephemeral {
            Some(sink) => sink.take(key).await,
            None => None,
        }
    }

    /// Drop artifacts still held in memory for removed tasks
    pub(crate) async fn release_deliveries(&self, deliveries: Vec<Delivery>) {
        for delivery in &deliveries {
            self.sink.release(delivery).await;
        }
    }

    /// Emit an event to all subscribers
    pub(crate) fn emit_event(&self, event: Event) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Write the bounded snapshot of `state` to storage
    pub(crate) async fn persist(&self, state: &mut QueueState) -> Result<()> {
        let limit = self.config.persistence.history_limit;
        self.store.save_tasks(&snapshot(&state.tasks, limit)).await?;
        state.last_persist = Instant::now();
        Ok(())
    }

    /// Persist, logging instead of failing; used from background paths
    pub(crate) async fn persist_logged(&self, state: &mut QueueState) {
        if let Err(e) = self.persist(state).await {
            tracing::error!(error = %e, "Failed to persist task snapshot");
        }
    }

    /// Persist unless a snapshot was written very recently
    pub(crate) async fn persist_throttled(&self, state: &mut QueueState) {
        if state.last_persist.elapsed() >= PROGRESS_PERSIST_INTERVAL {
            self.persist_logged(state).await;
        }
    }
}
