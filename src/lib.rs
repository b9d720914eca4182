//! # hls-dl
//!
//! Backend library for downloading HLS streams into single files.
//!
//! A playlist URL goes in, one merged artifact comes out. In between, the
//! media playlist is parsed into segment URLs, the segments are fetched by a
//! bounded worker pool with per-segment retry, and the bytes are joined in
//! playlist order before being handed to an output sink.
//!
//! On top of that sits [`TaskQueue`], a download manager that runs a limited
//! number of tasks at once, keeps the rest waiting in insertion order, and
//! persists every task so a restart picks up where it left off.
//!
//! ## Design Philosophy
//!
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Pluggable edges** - Transport, storage and output sinks are traits
//!
//! ## Quick Start
//!
//! ```no_run
//! use hls_dl::{Config, TaskQueue, TaskSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.output_dir = Some("./downloads".into());
//!
//!     let queue = TaskQueue::new(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = queue.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     queue
//!         .add_task(TaskSpec::new(
//!             "Trailer",
//!             "https://cdn.example/trailer/index.m3u8",
//!             "trailer.mp4",
//!         ))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Error types
pub mod error;
/// Playlist and segment transport
pub mod fetcher;
/// Playlist-to-artifact job state machine
pub mod job;
/// Task queue (decomposed into focused submodules)
pub mod manager;
/// Segment reassembly
pub mod merge;
/// Media playlist parsing
pub mod playlist;
/// Bounded segment fetch pool
pub mod pool;
/// Retry with a fixed interval by default, optionally growing by a multiplier
pub mod retry;
/// Output sinks for finished artifacts
pub mod sink;
/// Task store abstraction and file/memory backends
pub mod store;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use config::{Config, FileCollisionAction, SegmentMatch, Settings};
pub use db::Database;
pub use error::{DatabaseError, Error, Result, SegmentError, SinkError, TaskError};
pub use fetcher::{ReqwestTransport, Transport};
pub use manager::TaskQueue;
pub use sink::{Delivery, DirectorySink, EphemeralArtifact, EphemeralSink, FallbackSink, OutputSink};
pub use store::{JsonFileStore, MemoryStore, TaskStore};
pub use types::{Episode, Event, QueueStats, Task, TaskId, TaskSpec, TaskStatus};

/// Helper function to run the queue with graceful signal handling.
///
/// Waits for a termination signal and then calls the queue's `shutdown()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use hls_dl::{Config, TaskQueue, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let queue = TaskQueue::new(Config::default()).await?;
///
///     // Run until SIGTERM/SIGINT, then pause running tasks and persist
///     run_with_shutdown(queue).await?;
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(queue: TaskQueue) -> Result<()> {
    wait_for_signal().await;
    queue.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
