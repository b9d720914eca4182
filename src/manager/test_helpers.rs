//! Shared test helpers: a scripted transport and TaskQueue construction.

use crate::config::{Config, Settings};
use crate::error::{Error, Result, SegmentError, SinkError};
use crate::fetcher::Transport;
use crate::manager::TaskQueue;
use crate::sink::{Delivery, EphemeralSink, OutputSink};
use crate::store::{MemoryStore, TaskStore};
use crate::types::{Task, TaskId, TaskStatus};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Scripted response for one URL
#[derive(Clone, Default)]
struct Route {
    body: Option<Bytes>,
    failure: Option<SegmentError>,
    flaky: usize,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

/// Transport answering from a URL table
///
/// Unknown URLs answer HTTP 404. Every call is counted, and the highest
/// number of concurrent calls is tracked.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: HashMap<String, Route>,
    calls: Mutex<HashMap<String, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn route(&mut self, url: &str) -> &mut Route {
        self.routes.entry(url.to_string()).or_default()
    }

    /// Answer `url` with `body`
    pub(crate) fn with_body(mut self, url: &str, body: &[u8]) -> Self {
        self.route(url).body = Some(Bytes::copy_from_slice(body));
        self
    }

    /// Fail every call to `url` with `error`
    pub(crate) fn with_failure(mut self, url: &str, error: SegmentError) -> Self {
        self.route(url).failure = Some(error);
        self
    }

    /// Answer 503 for the first `failures` calls, then `body`
    pub(crate) fn with_flaky(mut self, url: &str, failures: usize, body: &[u8]) -> Self {
        let route = self.route(url);
        route.flaky = failures;
        route.body = Some(Bytes::copy_from_slice(body));
        self
    }

    /// Wait `delay` before answering `url`
    pub(crate) fn with_delay(mut self, url: &str, delay: Duration) -> Self {
        self.route(url).delay = Some(delay);
        self
    }

    /// Hold every call to `url` until a permit is added to `gate`
    pub(crate) fn with_gate(mut self, url: &str, gate: Arc<Semaphore>) -> Self {
        self.route(url).gate = Some(gate);
        self
    }

    /// Register a playlist of `segments` parts under `https://cdn.test/{name}/`
    ///
    /// Segment `i` answers with the bytes of `"{name}-{i};"`.
    pub(crate) fn with_video(mut self, name: &str, segments: usize) -> Self {
        self = self.with_body(&video_url(name), playlist_with_segments(segments).as_bytes());
        for i in 0..segments {
            let url = format!("https://cdn.test/{name}/seg{i}.ts");
            self = self.with_body(&url, format!("{name}-{i};").as_bytes());
        }
        self
    }

    /// Number of calls made for `url`
    pub(crate) fn calls(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    /// Number of calls made for any URL
    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    /// Highest number of concurrent calls observed
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, url: &str, _timeout: Duration) -> std::result::Result<Bytes, SegmentError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let Some(route) = self.routes.get(url) else {
            return Err(SegmentError::HttpStatus { status: 404 });
        };

        if let Some(gate) = &route.gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(SegmentError::network("gate closed")),
            }
        }
        if let Some(delay) = route.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = &route.failure {
            return Err(error.clone());
        }
        if call <= route.flaky {
            return Err(SegmentError::HttpStatus { status: 503 });
        }
        route
            .body
            .clone()
            .ok_or(SegmentError::HttpStatus { status: 404 })
    }
}

/// Config with short retry delays and no output directory
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.download.output_dir = None;
    config.download.segment_timeout = Duration::from_secs(2);
    config.download.playlist_timeout = Duration::from_secs(2);
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config
}

/// Media playlist with `n` relative segment lines `seg0.ts` .. `seg{n-1}.ts`
pub(crate) fn playlist_with_segments(n: usize) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n");
    for i in 0..n {
        playlist.push_str(&format!("#EXTINF:10.0,\nseg{i}.ts\n"));
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Playlist URL registered by [`MockTransport::with_video`]
pub(crate) fn video_url(name: &str) -> String {
    format!("https://cdn.test/{name}/index.m3u8")
}

/// Ephemeral sink that takes `delay` before accepting an artifact
pub(crate) struct SlowSink {
    pub(crate) delay: Duration,
    pub(crate) inner: EphemeralSink,
}

impl SlowSink {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: EphemeralSink::new(),
        }
    }
}

#[async_trait]
impl OutputSink for SlowSink {
    async fn deliver(&self, bytes: Bytes, filename: &str) -> std::result::Result<Delivery, SinkError> {
        tokio::time::sleep(self.delay).await;
        self.inner.deliver(bytes, filename).await
    }
}

/// Memory store whose task writes can be switched to fail
#[derive(Default)]
pub(crate) struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStore for FlakyStore {
    async fn load_tasks(&self) -> Result<Vec<Task>> {
        self.inner.load_tasks().await
    }

    async fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Other("disk full".into()));
        }
        self.inner.save_tasks(tasks).await
    }

    async fn load_settings(&self) -> Result<Settings> {
        self.inner.load_settings().await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.inner.save_settings(settings).await
    }
}

/// Queue wired to in-memory components
pub(crate) struct TestQueue {
    pub(crate) queue: TaskQueue,
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) sink: Arc<EphemeralSink>,
    pub(crate) transport: Arc<MockTransport>,
}

/// Create a queue over `transport` with [`fast_config`]
pub(crate) async fn create_test_queue(transport: MockTransport) -> TestQueue {
    create_test_queue_with(transport, fast_config(), MemoryStore::new()).await
}

/// Create a queue over explicit config and pre-seeded store
pub(crate) async fn create_test_queue_with(
    transport: MockTransport,
    config: Config,
    store: MemoryStore,
) -> TestQueue {
    let store = Arc::new(store);
    let sink = Arc::new(EphemeralSink::new());
    let transport = Arc::new(transport);
    let queue = TaskQueue::with_components(config, store.clone(), transport.clone(), sink.clone())
        .await
        .unwrap();
    TestQueue {
        queue,
        store,
        sink,
        transport,
    }
}

/// Poll until task `id` has `status`, panicking after five seconds
pub(crate) async fn wait_for_status(queue: &TaskQueue, id: TaskId, status: TaskStatus) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let task = queue.get_task(id).await;
        if let Some(task) = &task
            && task.status == status
        {
            return task.clone();
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("task {id} never reached {status}, last seen {task:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `count` tasks are active, panicking after five seconds
pub(crate) async fn wait_for_active(queue: &TaskQueue, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let active = queue.stats().await.active;
        if active == count {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("expected {count} active tasks, have {active}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
