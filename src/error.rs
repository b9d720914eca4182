//! Error types for hls-dl
//!
//! This module provides the error taxonomy for the library:
//! - Playlist format errors (unparsable or empty playlists)
//! - Per-segment transport errors (network, timeout, HTTP status)
//! - Reassembly and delivery errors
//! - Task queue errors (unknown task, invalid state transition)
//! - Persistence and configuration errors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::TaskId;

/// Result type alias for hls-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hls-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "segment_concurrency")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error raised outside of segment fetching (client construction etc.)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Playlist could not be parsed or contained no media segments
    #[error("invalid playlist: {0}")]
    Format(String),

    /// A single segment (or the playlist itself) could not be fetched
    #[error("fetch failed: {0}")]
    Segment(#[from] SegmentError),

    /// Some segments were still failing after their retries
    #[error(
        "{failed} of {total} segments failed{}",
        first_failure.as_ref().map(|f| format!(" ({f})")).unwrap_or_default()
    )]
    SegmentsFailed {
        /// Segments that failed
        failed: usize,
        /// Segments in the playlist
        total: usize,
        /// The lowest-index failure, as `segment <index>: <error>`
        first_failure: Option<String>,
    },

    /// Reassembly was attempted while some segments had no bytes
    #[error("incomplete data: {} segment(s) missing", missing.len())]
    IncompleteData {
        /// Indices of the segments without bytes
        missing: Vec<usize>,
    },

    /// Delivery of the finished artifact failed
    #[error("delivery failed: {0}")]
    Sink(#[from] SinkError),

    /// Task queue operation error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Internal scheduling invariant was breached
    #[error("scheduling violation: {0}")]
    SchedulingViolation(String),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Per-segment transport failure
///
/// Cloneable and serializable so it can travel inside events and be
/// stored as a task's last error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SegmentError {
    /// Connection-level failure (DNS, refused, reset, unsupported scheme)
    #[error("network error: {message}")]
    Network {
        /// Underlying transport message
        message: String,
    },

    /// The request did not finish within the configured timeout
    #[error("timed out after {}ms", after.as_millis())]
    Timeout {
        /// The timeout that elapsed
        #[serde(with = "duration_ms")]
        after: Duration,
    },

    /// The server answered with a non-success status code
    #[error("HTTP {status}")]
    HttpStatus {
        /// The HTTP status code
        status: u16,
    },

    /// The fetch was abandoned because its task was cancelled
    #[error("cancelled")]
    Cancelled,
}

impl SegmentError {
    /// Build a network error from any displayable transport error
    pub fn network(message: impl std::fmt::Display) -> Self {
        SegmentError::Network {
            message: message.to_string(),
        }
    }
}

/// Output sink errors
#[derive(Debug, Error)]
pub enum SinkError {
    /// No sink is able to accept the artifact
    #[error("output sink unavailable: {0}")]
    Unavailable(String),

    /// The durable directory exists but is not writable
    #[error("not authorized to write into {0}")]
    Unauthorized(PathBuf),

    /// Writing the artifact failed
    #[error("failed to write {path}: {reason}")]
    Write {
        /// The file being written
        path: PathBuf,
        /// The reason the write failed
        reason: String,
    },

    /// A file with the same name exists and renaming is disabled
    #[error("file already exists at {path}")]
    Collision {
        /// The colliding path
        path: PathBuf,
    },
}

/// Task queue errors
#[derive(Debug, Error)]
pub enum TaskError {
    /// Task not found in the queue
    #[error("task {id} not found")]
    NotFound {
        /// The task ID that was not found
        id: TaskId,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task ID that is in an invalid state for the operation
        id: TaskId,
        /// The operation that was attempted (e.g., "cancel")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },
}

impl Error {
    /// Get the machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Format(_) => "format_error",
            Error::Segment(e) => match e {
                SegmentError::Network { .. } => "network_error",
                SegmentError::Timeout { .. } => "timeout_error",
                SegmentError::HttpStatus { .. } => "http_status_error",
                SegmentError::Cancelled => "cancelled",
            },
            Error::SegmentsFailed { .. } => "segments_failed",
            Error::IncompleteData { .. } => "incomplete_data",
            Error::Sink(_) => "sink_error",
            Error::Task(e) => match e {
                TaskError::NotFound { .. } => "task_not_found",
                TaskError::InvalidState { .. } => "invalid_state",
            },
            Error::SchedulingViolation(_) => "scheduling_violation",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }
}

// Duration as integer milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
