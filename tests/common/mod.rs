//! Common test utilities for hls-dl integration tests

#![allow(dead_code)]

use hls_dl::{
    Config, EphemeralSink, OutputSink, ReqwestTransport, Task, TaskId, TaskQueue, TaskStatus,
    TaskStore,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Config with short timeouts and retry delays
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.download.output_dir = None;
    config.download.segment_timeout = Duration::from_secs(5);
    config.download.playlist_timeout = Duration::from_secs(5);
    config.retry.max_attempts = 2;
    config.retry.initial_delay = Duration::from_millis(10);
    config.retry.max_delay = Duration::from_millis(50);
    config
}

/// Body of segment `index` of the video `name`
pub fn segment_body(name: &str, index: usize) -> Vec<u8> {
    format!("{name}:{index}|").into_bytes()
}

/// Media playlist listing `lines`, one segment URI per entry
pub fn media_playlist(lines: &[String]) -> String {
    let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:6\n");
    for line in lines {
        playlist.push_str("#EXTINF:6.0,\n");
        playlist.push_str(line);
        playlist.push('\n');
    }
    playlist.push_str("#EXT-X-ENDLIST\n");
    playlist
}

/// Serve `/{name}/index.m3u8` with `segments` relative segment URIs
///
/// Returns the playlist URL.
pub async fn mount_video(server: &MockServer, name: &str, segments: usize) -> String {
    let lines: Vec<String> = (0..segments).map(|i| format!("seg{i}.ts")).collect();
    Mock::given(method("GET"))
        .and(path(format!("/{name}/index.m3u8")))
        .respond_with(ResponseTemplate::new(200).set_body_string(media_playlist(&lines)))
        .mount(server)
        .await;

    for i in 0..segments {
        Mock::given(method("GET"))
            .and(path(format!("/{name}/seg{i}.ts")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(segment_body(name, i)))
            .mount(server)
            .await;
    }

    format!("{}/{name}/index.m3u8", server.uri())
}

/// Concatenation of every segment body of `name`
pub fn expected_artifact(name: &str, segments: usize) -> Vec<u8> {
    (0..segments).flat_map(|i| segment_body(name, i)).collect()
}

/// Queue over a real HTTP transport
pub async fn create_queue(
    config: Config,
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn OutputSink>,
) -> TaskQueue {
    let transport = ReqwestTransport::new(None).expect("build transport");
    TaskQueue::with_components(config, store, Arc::new(transport), sink)
        .await
        .expect("create queue")
}

/// Queue delivering into a fresh ephemeral sink
pub async fn create_ephemeral_queue(
    config: Config,
    store: Arc<dyn TaskStore>,
) -> (TaskQueue, Arc<EphemeralSink>) {
    let sink = Arc::new(EphemeralSink::new());
    let queue = create_queue(config, store, sink.clone()).await;
    (queue, sink)
}

/// Poll until task `id` has `status`
pub async fn wait_for_status(queue: &TaskQueue, id: TaskId, status: TaskStatus) -> Task {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = queue.get_task(id).await;
        if let Some(task) = &task
            && task.status == status
        {
            return task.clone();
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task {id} never reached {status}, last seen {task:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
