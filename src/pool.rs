//! Bounded-concurrency segment download pool
//!
//! Workers share one cursor over the segment list and claim the next index
//! atomically, so each segment is fetched by exactly one worker. Results are
//! placed by index, which keeps output order independent of completion order.

use crate::config::RetryConfig;
use crate::error::SegmentError;
use crate::fetcher::{Transport, fetch_segment};
use crate::playlist::Segment;
use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Final outcome of one segment
#[derive(Clone, Debug)]
pub struct SegmentResult {
    /// Segment index
    pub index: usize,
    /// Segment URL
    pub url: String,
    /// Downloaded bytes, or the error left after retries
    pub outcome: Result<Bytes, SegmentError>,
}

impl SegmentResult {
    /// Bytes of a successful fetch
    pub fn bytes(&self) -> Option<&Bytes> {
        self.outcome.as_ref().ok()
    }

    /// Whether the segment was fetched successfully
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Progress snapshot emitted after every finished segment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolProgress {
    /// Segments finished, successfully or not
    pub completed: usize,
    /// Segments that failed after retries
    pub failed: usize,
    /// Total segments
    pub total: usize,
    /// `completed / total` as a whole percentage
    pub percent: u8,
    /// Bytes downloaded so far
    pub bytes: u64,
}

/// Notification from a running pool
#[derive(Clone, Debug)]
pub enum PoolUpdate {
    /// A segment finished
    Progress(PoolProgress),
    /// A segment failed after exhausting retries
    SegmentFailed {
        /// Segment index
        index: usize,
        /// Segment URL
        url: String,
        /// Final error
        error: SegmentError,
    },
}

/// Runs segment fetches with a fixed number of workers
pub struct FetchPool {
    transport: Arc<dyn Transport>,
    concurrency: usize,
    timeout: Duration,
    retry: RetryConfig,
}

impl FetchPool {
    /// Create a pool; `concurrency` is clamped to at least one worker
    pub fn new(
        transport: Arc<dyn Transport>,
        concurrency: usize,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            transport,
            concurrency: concurrency.max(1),
            timeout,
            retry,
        }
    }

    /// Fetch every segment and return one result per segment, in index order
    ///
    /// Never fails as a whole: per-segment errors are collected in the
    /// results. Segments never claimed because of cancellation are reported
    /// as [`SegmentError::Cancelled`].
    pub async fn run<F>(
        &self,
        segments: &[Segment],
        cancel: &CancellationToken,
        on_update: F,
    ) -> Vec<SegmentResult>
    where
        F: Fn(PoolUpdate) + Send + Sync,
    {
        let total = segments.len();
        let cursor = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let bytes = AtomicU64::new(0);
        let workers = self.concurrency.min(total);

        tracing::debug!(segments = total, workers, "Starting fetch pool");

        let worker = |worker_id: usize| {
            let (cursor, completed, failed, bytes, on_update) =
                (&cursor, &completed, &failed, &bytes, &on_update);
            async move {
                let mut local = Vec::new();
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let position = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(segment) = segments.get(position) else {
                        break;
                    };

                    let outcome = fetch_segment(
                        self.transport.as_ref(),
                        &segment.url,
                        self.timeout,
                        &self.retry,
                        cancel,
                    )
                    .await;

                    if matches!(outcome, Err(SegmentError::Cancelled)) {
                        local.push(SegmentResult {
                            index: segment.index,
                            url: segment.url.clone(),
                            outcome,
                        });
                        break;
                    }

                    match &outcome {
                        Ok(body) => {
                            bytes.fetch_add(body.len() as u64, Ordering::SeqCst);
                        }
                        Err(error) => {
                            failed.fetch_add(1, Ordering::SeqCst);
                            tracing::error!(
                                segment = segment.index,
                                url = %segment.url,
                                error = %error,
                                worker = worker_id,
                                "Segment failed after retries"
                            );
                            on_update(PoolUpdate::SegmentFailed {
                                index: segment.index,
                                url: segment.url.clone(),
                                error: error.clone(),
                            });
                        }
                    }

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    on_update(PoolUpdate::Progress(PoolProgress {
                        completed: done,
                        failed: failed.load(Ordering::SeqCst),
                        total,
                        percent: percent(done, total),
                        bytes: bytes.load(Ordering::SeqCst),
                    }));

                    local.push(SegmentResult {
                        index: segment.index,
                        url: segment.url.clone(),
                        outcome,
                    });
                }
                local
            }
        };

        let batches = join_all((0..workers).map(worker)).await;

        let mut slots: Vec<Option<SegmentResult>> = vec![None; total];
        for result in batches.into_iter().flatten() {
            if let Some(slot) = slots.get_mut(result.index) {
                *slot = Some(result);
            }
        }

        slots
            .into_iter()
            .zip(segments)
            .map(|(slot, segment)| {
                slot.unwrap_or_else(|| SegmentResult {
                    index: segment.index,
                    url: segment.url.clone(),
                    outcome: Err(SegmentError::Cancelled),
                })
            })
            .collect()
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}
