use super::TaskQueue;
use super::test_helpers::*;
use crate::config::Settings;
use crate::error::{Error, SegmentError, TaskError};
use crate::sink::EphemeralSink;
use crate::store::{MemoryStore, TaskStore};
use crate::types::{Event, Task, TaskId, TaskSpec, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

mod scheduler;

/// Spec for the video registered by [`MockTransport::with_video`]
fn video_spec(name: &str) -> TaskSpec {
    TaskSpec::new(name, video_url(name), format!("{name}.mp4"))
}

/// Transport whose playlists for `names` wait on a shared gate
fn gated_videos(names: &[&str], segments: usize) -> (MockTransport, Arc<Semaphore>) {
    let gate = Arc::new(Semaphore::new(0));
    let mut transport = MockTransport::new();
    for name in names {
        transport = transport
            .with_video(name, segments)
            .with_gate(&video_url(name), gate.clone());
    }
    (transport, gate)
}
