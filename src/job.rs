//! Single playlist-to-artifact conversion
//!
//! A [`FetchJob`] owns its state exclusively and reports every transition to
//! its owner over an mpsc channel. The job moves through
//! `Pending -> Parsing -> Fetching -> Merging -> Delivering -> Completed`;
//! `Failed` is reachable from every intermediate phase. A cancelled job stops
//! without emitting a terminal event.

use crate::config::Config;
use crate::error::{Error, Result, SegmentError};
use crate::fetcher::{Transport, fetch_playlist};
use crate::merge::merge;
use crate::playlist::{self, Segment};
use crate::pool::{FetchPool, PoolProgress, PoolUpdate};
use crate::sink::{Delivery, OutputSink};
use crate::types::{TaskId, TaskStatus};
use crate::utils::format_speed;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// FetchJob lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    /// Created, not started
    Pending,
    /// Fetching and parsing the playlist
    Parsing,
    /// Downloading segments
    Fetching,
    /// Concatenating segment bytes
    Merging,
    /// Handing the artifact to the sink
    Delivering,
    /// Artifact delivered
    Completed,
    /// Terminal failure
    Failed,
}

impl JobState {
    /// Whether `next` is a legal successor of `self`
    pub fn can_transition_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Parsing)
                | (Parsing, Fetching)
                | (Fetching, Merging)
                | (Merging, Delivering)
                | (Delivering, Completed)
                | (Parsing | Fetching | Merging | Delivering, Failed)
        )
    }

    /// Whether the job has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    /// Matching task status
    pub fn task_status(self) -> TaskStatus {
        match self {
            JobState::Pending => TaskStatus::Pending,
            JobState::Parsing => TaskStatus::Parsing,
            JobState::Fetching => TaskStatus::Fetching,
            JobState::Merging => TaskStatus::Merging,
            JobState::Delivering => TaskStatus::Delivering,
            JobState::Completed => TaskStatus::Completed,
            JobState::Failed => TaskStatus::Failed,
        }
    }

    /// Human-readable label; `segments` is the playlist length once known
    pub fn label(self, segments: usize) -> String {
        match self {
            JobState::Pending => "Waiting".to_string(),
            JobState::Parsing => "Fetching playlist".to_string(),
            JobState::Fetching => format!("Downloading {segments} segments"),
            JobState::Merging => "Merging segments".to_string(),
            JobState::Delivering => "Saving file".to_string(),
            JobState::Completed => "Completed".to_string(),
            JobState::Failed => "Failed".to_string(),
        }
    }
}

/// Notification from a running job to its owner
#[derive(Clone, Debug)]
pub enum JobEvent {
    /// The job entered a new state
    State {
        /// New state
        state: JobState,
        /// Human-readable label
        label: String,
        /// Segment count, once the playlist is parsed
        total: usize,
    },
    /// A segment finished
    Progress {
        /// Pool counters
        progress: PoolProgress,
        /// Transfer rate so far
        speed: String,
    },
    /// A segment failed after its retries
    SegmentFailed {
        /// Segment index
        index: usize,
        /// Segment URL
        url: String,
        /// Final error
        error: SegmentError,
    },
    /// Artifact delivered
    Completed {
        /// Requested filename
        filename: String,
        /// Artifact size in bytes
        size: u64,
        /// Segments merged
        segment_count: usize,
        /// Where the artifact went
        delivery: Delivery,
    },
    /// The job failed
    Failed {
        /// Error summary
        error: String,
        /// Failed segment count, when fetching caused the failure
        failed_segments: Option<usize>,
    },
}

/// How a job run ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// Delivered
    Completed,
    /// Failed; the error was reported as [`JobEvent::Failed`]
    Failed,
    /// Abandoned on cancellation
    Cancelled,
}

/// One playlist-to-artifact conversion
pub struct FetchJob {
    id: TaskId,
    source_url: String,
    target_name: String,
    state: JobState,
    segments: Vec<Segment>,
    completed_count: usize,
    failed_count: usize,
    last_error: Option<String>,
    config: Config,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn OutputSink>,
    events: mpsc::UnboundedSender<JobEvent>,
}

impl FetchJob {
    /// Create a job in the `Pending` state
    pub fn new(
        id: TaskId,
        source_url: impl Into<String>,
        target_name: impl Into<String>,
        config: Config,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn OutputSink>,
        events: mpsc::UnboundedSender<JobEvent>,
    ) -> Self {
        Self {
            id,
            source_url: source_url.into(),
            target_name: target_name.into(),
            state: JobState::Pending,
            segments: Vec::new(),
            completed_count: 0,
            failed_count: 0,
            last_error: None,
            config,
            transport,
            sink,
            events,
        }
    }

    /// Current state
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Parsed segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segments finished and segments failed
    pub fn counts(&self) -> (usize, usize) {
        (self.completed_count, self.failed_count)
    }

    /// Error summary of the failure, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Run the job to a terminal state or until cancelled
    pub async fn run(&mut self, cancel: CancellationToken) -> JobOutcome {
        match self.execute(&cancel).await {
            Ok(()) => JobOutcome::Completed,
            Err(_) if cancel.is_cancelled() => {
                tracing::debug!(task_id = %self.id, state = ?self.state, "Job abandoned after cancellation");
                JobOutcome::Cancelled
            }
            Err(e) => {
                let failed_segments = (self.failed_count > 0).then_some(self.failed_count);
                self.fail(e.to_string(), failed_segments);
                JobOutcome::Failed
            }
        }
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<()> {
        self.transition(JobState::Parsing)?;
        let text = fetch_playlist(
            self.transport.as_ref(),
            &self.source_url,
            self.config.download.playlist_timeout,
            cancel,
        )
        .await?;
        self.segments = playlist::parse(
            &text,
            &self.source_url,
            self.config.download.segment_match,
        )?;

        self.transition(JobState::Fetching)?;
        let started = Instant::now();
        let pool = FetchPool::new(
            self.transport.clone(),
            self.config.download.segment_concurrency,
            self.config.download.segment_timeout,
            self.config.retry.clone(),
        );
        let events = self.events.clone();
        let results = pool
            .run(&self.segments, cancel, move |update| {
                let event = match update {
                    PoolUpdate::Progress(progress) => JobEvent::Progress {
                        progress,
                        speed: format_speed(progress.bytes, started.elapsed().as_secs_f64()),
                    },
                    PoolUpdate::SegmentFailed { index, url, error } => {
                        JobEvent::SegmentFailed { index, url, error }
                    }
                };
                let _ = events.send(event);
            })
            .await;

        ensure_running(cancel)?;

        self.completed_count = results.len();
        self.failed_count = results.iter().filter(|r| !r.is_ok()).count();
        if let Some(first) = results.iter().find(|r| !r.is_ok()) {
            let first_failure = match &first.outcome {
                Err(e) => Some(format!("segment {}: {}", first.index, e)),
                Ok(_) => None,
            };
            return Err(Error::SegmentsFailed {
                failed: self.failed_count,
                total: results.len(),
                first_failure,
            });
        }

        self.transition(JobState::Merging)?;
        let artifact = merge(&results)?;

        ensure_running(cancel)?;
        self.transition(JobState::Delivering)?;
        let size = artifact.len() as u64;
        // a cancelled delivery is dropped before the sink commits the artifact
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Segment(SegmentError::Cancelled)),
            delivered = self.sink.deliver(artifact, &self.target_name) => delivered?,
        };
        if cancel.is_cancelled() {
            self.sink.release(&delivery).await;
            return Err(Error::Segment(SegmentError::Cancelled));
        }

        self.transition(JobState::Completed)?;
        tracing::info!(
            task_id = %self.id,
            segments = self.segments.len(),
            size,
            "Job completed"
        );
        self.emit(JobEvent::Completed {
            filename: self.target_name.clone(),
            size,
            segment_count: self.segments.len(),
            delivery,
        });
        Ok(())
    }

    /// Guarded state change; emits the new state
    fn transition(&mut self, next: JobState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::Other(format!(
                "illegal job transition {:?} -> {:?}",
                self.state, next
            )));
        }
        tracing::debug!(task_id = %self.id, from = ?self.state, to = ?next, "Job state change");
        self.state = next;
        self.emit(JobEvent::State {
            state: next,
            label: next.label(self.segments.len()),
            total: self.segments.len(),
        });
        Ok(())
    }

    fn fail(&mut self, error: String, failed_segments: Option<usize>) {
        if self.state.is_terminal() {
            return;
        }
        if self.transition(JobState::Failed).is_err() {
            // failing before the job started
            self.state = JobState::Failed;
        }
        tracing::warn!(task_id = %self.id, error = %error, "Job failed");
        self.last_error = Some(error.clone());
        self.emit(JobEvent::Failed {
            error,
            failed_segments,
        });
    }

    fn emit(&self, event: JobEvent) {
        // owner gone means nobody is listening any more
        let _ = self.events.send(event);
    }
}

fn ensure_running(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Segment(SegmentError::Cancelled));
    }
    Ok(())
}
