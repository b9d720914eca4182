//! End-to-end tests against a local HTTP server

mod common;

use common::*;
use hls_dl::{
    Config, Delivery, DirectorySink, EphemeralSink, Event, FallbackSink, FileCollisionAction,
    MemoryStore, TaskQueue, TaskSpec, TaskStatus,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn segments_resolve_relative_root_and_absolute_uris() {
    let server = MockServer::start().await;
    let lines = vec![
        "seg0.ts".to_string(),
        "/shared/seg1.ts".to_string(),
        format!("{}/elsewhere/seg2.ts", server.uri()),
        "../up/seg3.ts".to_string(),
    ];
    Mock::given(method("GET"))
        .and(path("/show/hd/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(media_playlist(&lines)))
        .mount(&server)
        .await;
    for (route, body) in [
        ("/show/hd/seg0.ts", "zero,"),
        ("/shared/seg1.ts", "one,"),
        ("/elsewhere/seg2.ts", "two,"),
        ("/show/up/seg3.ts", "three"),
    ] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;
    }

    let (queue, sink) = create_ephemeral_queue(test_config(), Arc::new(MemoryStore::new())).await;
    let id = queue
        .add_task(TaskSpec::new(
            "Show",
            format!("{}/show/hd/index.m3u8", server.uri()),
            "show.mp4",
        ))
        .await
        .unwrap();

    let task = wait_for_status(&queue, id, TaskStatus::Completed).await;
    assert_eq!(task.total, 4);

    let key = &sink.pending().await[0];
    let artifact = sink.take(key).await.unwrap();
    assert_eq!(&artifact.bytes[..], b"zero,one,two,three");
}

#[tokio::test]
async fn one_failed_segment_of_four_fails_the_task_without_delivery() {
    let server = MockServer::start().await;
    let lines: Vec<String> = (0..4).map(|i| format!("seg{i}.ts")).collect();
    Mock::given(method("GET"))
        .and(path("/broken/index.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(media_playlist(&lines)))
        .mount(&server)
        .await;
    for i in [0, 1, 3] {
        Mock::given(method("GET"))
            .and(path(format!("/broken/seg{i}.ts")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(segment_body("broken", i)))
            .mount(&server)
            .await;
    }
    // one initial attempt plus two retries
    Mock::given(method("GET"))
        .and(path("/broken/seg2.ts"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let (queue, sink) = create_ephemeral_queue(test_config(), Arc::new(MemoryStore::new())).await;
    let mut events = queue.subscribe();
    let id = queue
        .add_task(TaskSpec::new(
            "Broken",
            format!("{}/broken/index.m3u8", server.uri()),
            "broken.mp4",
        ))
        .await
        .unwrap();

    let task = wait_for_status(&queue, id, TaskStatus::Failed).await;
    assert_eq!(task.failed, 1);
    let error = task.error.unwrap();
    assert!(error.contains("1 of 4"), "unexpected error: {error}");
    assert!(sink.pending().await.is_empty());

    let mut failed_segments = None;
    let mut segment_failures = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            Event::Failed {
                failed_segments: count,
                ..
            } => failed_segments = count,
            Event::SegmentFailed { index, .. } => segment_failures.push(index),
            Event::Completed { .. } => panic!("task must not complete"),
            _ => {}
        }
    }
    assert_eq!(failed_segments, Some(1));
    assert_eq!(segment_failures, vec![2]);
}

#[tokio::test]
async fn five_tasks_never_exceed_three_active() {
    let server = MockServer::start().await;
    let mut urls = Vec::new();
    for i in 0..5 {
        let name = format!("slow{i}");
        let lines: Vec<String> = (0..2).map(|s| format!("seg{s}.ts")).collect();
        Mock::given(method("GET"))
            .and(path(format!("/{name}/index.m3u8")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(media_playlist(&lines))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        for s in 0..2 {
            Mock::given(method("GET"))
                .and(path(format!("/{name}/seg{s}.ts")))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(segment_body(&name, s)))
                .mount(&server)
                .await;
        }
        urls.push((name.clone(), format!("{}/{name}/index.m3u8", server.uri())));
    }

    let (queue, sink) = create_ephemeral_queue(test_config(), Arc::new(MemoryStore::new())).await;
    let specs = urls
        .iter()
        .map(|(name, url)| TaskSpec::new(name.clone(), url.clone(), format!("{name}.mp4")))
        .collect();
    let ids = queue.add_batch(specs).await.unwrap();

    let mut peak = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = queue.stats().await;
        assert!(stats.active <= 3, "{} tasks active", stats.active);
        peak = peak.max(stats.active);
        if stats.completed == 5 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "tasks never finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(peak, 3);
    assert_eq!(sink.pending().await.len(), 5);
    for id in ids {
        assert_eq!(queue.get_task(id).await.unwrap().status, TaskStatus::Completed);
    }
}

#[tokio::test]
async fn master_playlist_is_reported_as_a_format_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/master.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2400000\nhigh/index.m3u8\n",
        ))
        .mount(&server)
        .await;

    let (queue, _sink) = create_ephemeral_queue(test_config(), Arc::new(MemoryStore::new())).await;
    let id = queue
        .add_task(TaskSpec::new(
            "Master",
            format!("{}/master.m3u8", server.uri()),
            "master.mp4",
        ))
        .await
        .unwrap();

    let task = wait_for_status(&queue, id, TaskStatus::Failed).await;
    assert!(task.error.unwrap().contains("2 variant stream"));
}

#[tokio::test]
async fn directory_sink_writes_files_and_renames_on_collision() {
    let server = MockServer::start().await;
    let url = mount_video(&server, "clip", 3).await;
    let dir = tempfile::tempdir().unwrap();

    let sink = Arc::new(DirectorySink::new(dir.path(), FileCollisionAction::Rename));
    let mut config = test_config();
    config.download.max_concurrent_downloads = 1;
    let queue = create_queue(config, Arc::new(MemoryStore::new()), sink).await;
    let mut events = queue.subscribe();

    let ids = queue
        .add_batch(vec![
            TaskSpec::new("Clip", url.clone(), "clip.mp4"),
            TaskSpec::new("Clip", url, "clip.mp4"),
        ])
        .await
        .unwrap();
    for id in &ids {
        wait_for_status(&queue, *id, TaskStatus::Completed).await;
    }

    let expected = expected_artifact("clip", 3);
    assert_eq!(std::fs::read(dir.path().join("clip.mp4")).unwrap(), expected);
    assert_eq!(std::fs::read(dir.path().join("clip (1).mp4")).unwrap(), expected);

    let mut written = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::Completed {
            delivery: Delivery::Written { path },
            ..
        } = event
        {
            written.push(path);
        }
    }
    assert_eq!(written.len(), 2);
}

#[tokio::test]
async fn missing_directory_falls_back_to_ephemeral_delivery() {
    let server = MockServer::start().await;
    let url = mount_video(&server, "fb", 2).await;
    let dir = tempfile::tempdir().unwrap();

    let ephemeral = Arc::new(EphemeralSink::new());
    let sink = FallbackSink::new(
        Some(DirectorySink::new(
            dir.path().join("does-not-exist"),
            FileCollisionAction::Rename,
        )),
        ephemeral.clone(),
    );
    let queue = create_queue(test_config(), Arc::new(MemoryStore::new()), Arc::new(sink)).await;

    let id = queue
        .add_task(TaskSpec::new("Fallback", url, "fb.mp4"))
        .await
        .unwrap();
    wait_for_status(&queue, id, TaskStatus::Completed).await;

    let keys = ephemeral.pending().await;
    assert_eq!(keys.len(), 1);
    let artifact = ephemeral.take(&keys[0]).await.unwrap();
    assert_eq!(artifact.filename, "fb.mp4");
    assert_eq!(artifact.bytes.to_vec(), expected_artifact("fb", 2));
}

#[tokio::test]
async fn production_stack_writes_into_the_output_directory() {
    let server = MockServer::start().await;
    let url = mount_video(&server, "prod", 2).await;
    let dir = tempfile::tempdir().unwrap();

    let mut config: Config = test_config();
    config.download.output_dir = Some(dir.path().join("out"));
    config.persistence.database_path = dir.path().join("queue.db");

    let queue = TaskQueue::new(config).await.unwrap();
    let id = queue
        .add_task(TaskSpec::new("Prod", url, "prod.mp4"))
        .await
        .unwrap();
    wait_for_status(&queue, id, TaskStatus::Completed).await;

    assert_eq!(
        std::fs::read(dir.path().join("out").join("prod.mp4")).unwrap(),
        expected_artifact("prod", 2)
    );
    assert!(queue.take_artifact("1/prod.mp4").await.is_none());
    queue.shutdown().await.unwrap();
}
