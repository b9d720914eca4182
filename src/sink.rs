//! Output sinks that receive finished artifacts
//!
//! Two destinations exist: a durable directory on disk and an ephemeral
//! in-memory hand-off the host turns into a save action. [`FallbackSink`]
//! prefers the directory and degrades to the ephemeral sink when the
//! directory cannot be used.

use crate::config::{DownloadConfig, FileCollisionAction};
use crate::error::SinkError;
use crate::utils::{get_unique_path, sanitize_filename};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Where a delivered artifact ended up
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Delivery {
    /// Written to disk
    Written {
        /// Final path (may differ from the requested name after auto-rename)
        path: PathBuf,
    },
    /// Held in memory until the host claims it
    Ephemeral {
        /// Key passed to [`EphemeralSink::take`]
        key: String,
    },
}

/// Destination for finished artifacts
#[async_trait]
pub trait OutputSink: Send + Sync {
    /// Hand over the artifact bytes under the given filename
    async fn deliver(&self, bytes: Bytes, filename: &str) -> Result<Delivery, SinkError>;

    /// Drop an artifact that was delivered but never claimed
    ///
    /// Only artifacts held in memory are affected; written files stay.
    async fn release(&self, _delivery: &Delivery) {}
}

/// Writes artifacts into a pre-authorized directory
#[derive(Clone, Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    collision: FileCollisionAction,
}

impl DirectorySink {
    /// Create a sink writing into `dir`
    pub fn new(dir: impl Into<PathBuf>, collision: FileCollisionAction) -> Self {
        Self {
            dir: dir.into(),
            collision,
        }
    }

    /// Target directory
    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    async fn check_writable(&self) -> Result<(), SinkError> {
        let metadata = tokio::fs::metadata(&self.dir).await.map_err(|e| {
            SinkError::Unavailable(format!("{}: {}", self.dir.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(SinkError::Unavailable(format!(
                "{} is not a directory",
                self.dir.display()
            )));
        }
        if metadata.permissions().readonly() {
            return Err(SinkError::Unauthorized(self.dir.clone()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutputSink for DirectorySink {
    async fn deliver(&self, bytes: Bytes, filename: &str) -> Result<Delivery, SinkError> {
        self.check_writable().await?;

        // filename must not escape the directory
        let requested = self.dir.join(sanitize_filename(filename));
        let path = get_unique_path(&requested, self.collision)?;

        tokio::fs::write(&path, &bytes).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                SinkError::Unauthorized(self.dir.clone())
            } else {
                SinkError::Write {
                    path: path.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        tracing::info!(path = %path.display(), size = bytes.len(), "Artifact written");
        Ok(Delivery::Written { path })
    }
}

/// An artifact waiting to be claimed from an [`EphemeralSink`]
#[derive(Clone, Debug)]
pub struct EphemeralArtifact {
    /// Requested filename
    pub filename: String,
    /// Artifact bytes
    pub bytes: Bytes,
}

/// Keeps artifacts in memory until the host claims them
#[derive(Debug, Default)]
pub struct EphemeralSink {
    artifacts: Mutex<HashMap<String, EphemeralArtifact>>,
    next_key: AtomicU64,
}

impl EphemeralSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim an artifact, removing it from the sink
    pub async fn take(&self, key: &str) -> Option<EphemeralArtifact> {
        self.artifacts.lock().await.remove(key)
    }

    /// Keys of artifacts not yet claimed
    pub async fn pending(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.artifacts.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl OutputSink for EphemeralSink {
    async fn deliver(&self, bytes: Bytes, filename: &str) -> Result<Delivery, SinkError> {
        let n = self.next_key.fetch_add(1, Ordering::SeqCst) + 1;
        let key = format!("{n}/{filename}");
        let size = bytes.len();

        self.artifacts.lock().await.insert(
            key.clone(),
            EphemeralArtifact {
                filename: filename.to_string(),
                bytes,
            },
        );

        tracing::info!(key = %key, size, "Artifact held for pickup");
        Ok(Delivery::Ephemeral { key })
    }

    async fn release(&self, delivery: &Delivery) {
        if let Delivery::Ephemeral { key } = delivery
            && self.artifacts.lock().await.remove(key).is_some()
        {
            tracing::debug!(key = %key, "Released unclaimed artifact");
        }
    }
}

/// Directory sink with an ephemeral fallback
///
/// Any directory failure other than a refused collision falls through to
/// the ephemeral sink, so a finished download is never lost to a missing
/// or read-only directory.
#[derive(Clone)]
pub struct FallbackSink {
    durable: Option<DirectorySink>,
    ephemeral: Arc<EphemeralSink>,
}

impl FallbackSink {
    /// Combine an optional directory sink with an ephemeral sink
    pub fn new(durable: Option<DirectorySink>, ephemeral: Arc<EphemeralSink>) -> Self {
        Self { durable, ephemeral }
    }

    /// Build from the download configuration's `output_dir` and collision policy
    pub fn from_config(config: &DownloadConfig, ephemeral: Arc<EphemeralSink>) -> Self {
        let durable = config
            .output_dir
            .as_ref()
            .map(|dir| DirectorySink::new(dir.clone(), config.file_collision));
        Self::new(durable, ephemeral)
    }

    /// The ephemeral side, for claiming artifacts
    pub fn ephemeral(&self) -> &Arc<EphemeralSink> {
        &self.ephemeral
    }
}

#[async_trait]
impl OutputSink for FallbackSink {
    async fn deliver(&self, bytes: Bytes, filename: &str) -> Result<Delivery, SinkError> {
        if let Some(durable) = &self.durable {
            match durable.deliver(bytes.clone(), filename).await {
                Ok(delivery) => return Ok(delivery),
                Err(e @ SinkError::Collision { .. }) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        dir = %durable.dir().display(),
                        "Directory delivery failed, falling back to ephemeral delivery"
                    );
                }
            }
        }
        self.ephemeral.deliver(bytes, filename).await
    }

    async fn release(&self, delivery: &Delivery) {
        self.ephemeral.release(delivery).await;
    }
}
