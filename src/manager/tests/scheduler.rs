use super::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[tokio::test]
async fn five_tasks_with_ceiling_three_run_three_at_a_time() {
    let names = ["v1", "v2", "v3", "v4", "v5"];
    let (transport, gate) = gated_videos(&names, 2);
    let t = create_test_queue(transport).await;

    let ids = t
        .queue
        .add_batch(names.iter().map(|n| video_spec(n)).collect())
        .await
        .unwrap();
    wait_for_active(&t.queue, 3).await;

    let tasks = t.queue.list_tasks().await;
    let statuses: Vec<TaskStatus> = tasks.iter().map(|t| t.status).collect();
    assert!(statuses[..3].iter().all(|s| s.is_active()));
    assert_eq!(&statuses[3..], &[TaskStatus::Pending, TaskStatus::Pending]);

    // release one playlist; exactly one pending task takes the freed slot
    gate.add_permits(1);
    let mut finished = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while finished.is_none() {
        for id in &ids[..3] {
            if t.queue.get_task(*id).await.unwrap().status == TaskStatus::Completed {
                finished = Some(*id);
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "no task finished");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_status(&t.queue, ids[3], TaskStatus::Parsing).await;
    assert_eq!(t.queue.stats().await.active, 3);
    assert_eq!(
        t.queue.get_task(ids[4]).await.unwrap().status,
        TaskStatus::Pending,
        "admission follows insertion order"
    );

    gate.add_permits(10);
    for id in &ids {
        wait_for_status(&t.queue, *id, TaskStatus::Completed).await;
    }
    assert!(t.transport.max_in_flight() >= 3);
}

#[tokio::test]
async fn admission_announces_parsing_once() {
    let t = create_test_queue(MockTransport::new().with_video("v", 2)).await;
    let mut events = t.queue.subscribe();

    let id = t.queue.add_task(video_spec("v")).await.unwrap();
    wait_for_status(&t.queue, id, TaskStatus::Completed).await;

    let mut parsing = 0;
    while let Ok(event) = events.try_recv() {
        if let Event::StatusChanged {
            id: changed,
            status: TaskStatus::Parsing,
            ..
        } = event
            && changed == id
        {
            parsing += 1;
        }
    }
    assert_eq!(parsing, 1);
}

#[tokio::test]
async fn raising_the_ceiling_admits_waiting_tasks() {
    let names = ["a", "b", "c", "d", "e"];
    let (transport, _gate) = gated_videos(&names, 1);
    let t = create_test_queue(transport).await;
    t.queue
        .add_batch(names.iter().map(|n| video_spec(n)).collect())
        .await
        .unwrap();
    wait_for_active(&t.queue, 3).await;

    t.queue
        .update_settings(Settings {
            max_concurrent_downloads: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();

    wait_for_active(&t.queue, 5).await;
}

#[tokio::test]
async fn lowering_the_ceiling_holds_back_admission_only() {
    let names = ["a", "b", "c", "d"];
    let (transport, gate) = gated_videos(&names, 1);
    let t = create_test_queue(transport).await;
    let ids = t
        .queue
        .add_batch(names.iter().map(|n| video_spec(n)).collect())
        .await
        .unwrap();
    wait_for_active(&t.queue, 3).await;

    t.queue
        .update_settings(Settings {
            max_concurrent_downloads: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(t.queue.stats().await.active, 3, "running jobs are not stopped");

    // two finish; the active count drops to one and the last task still waits
    gate.add_permits(2);
    wait_for_active(&t.queue, 1).await;
    assert_eq!(
        t.queue.get_task(ids[3]).await.unwrap().status,
        TaskStatus::Pending
    );

    gate.add_permits(10);
    wait_for_status(&t.queue, ids[3], TaskStatus::Completed).await;
}

#[tokio::test]
async fn failed_task_releases_its_slot() {
    let transport = MockTransport::new()
        .with_failure(&video_url("bad"), SegmentError::HttpStatus { status: 404 })
        .with_video("next", 1);
    let mut config = fast_config();
    config.download.max_concurrent_downloads = 1;
    let t = create_test_queue_with(transport, config, MemoryStore::new()).await;

    let bad = t.queue.add_task(video_spec("bad")).await.unwrap();
    let next = t.queue.add_task(video_spec("next")).await.unwrap();

    wait_for_status(&t.queue, bad, TaskStatus::Failed).await;
    wait_for_status(&t.queue, next, TaskStatus::Completed).await;
}

/// Random control traffic never pushes the active count over the ceiling,
/// and once the gate opens every surviving task settles.
#[tokio::test]
async fn active_count_stays_within_ceiling_under_random_operations() {
    let names: Vec<String> = (0..12).map(|i| format!("r{i}")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let (transport, gate) = gated_videos(&refs, 1);
    let mut config = fast_config();
    config.download.max_concurrent_downloads = 2;
    let t = create_test_queue_with(transport, config, MemoryStore::new()).await;

    let mut rng = StdRng::seed_from_u64(7);
    let mut ids: Vec<TaskId> = Vec::new();

    for step in 0..120 {
        match rng.gen_range(0..5) {
            0 | 1 => {
                let name = &names[rng.gen_range(0..names.len())];
                ids.push(t.queue.add_task(video_spec(name)).await.unwrap());
            }
            2 if !ids.is_empty() => {
                let id = ids[rng.gen_range(0..ids.len())];
                // completed or failed tasks reject cancel; that is fine here
                let _ = t.queue.cancel(id).await;
            }
            3 if !ids.is_empty() => {
                let id = ids[rng.gen_range(0..ids.len())];
                t.queue.retry(id).await.unwrap();
            }
            4 if !ids.is_empty() && rng.gen_bool(0.3) => {
                let index = rng.gen_range(0..ids.len());
                t.queue.remove(ids.swap_remove(index)).await.unwrap();
            }
            _ => {}
        }
        if step % 10 == 0 {
            gate.add_permits(1);
        }
        tokio::task::yield_now().await;

        let active = t.queue.stats().await.active;
        assert!(active <= 2, "step {step}: {active} active tasks");
    }

    gate.add_permits(1000);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let stats = t.queue.stats().await;
        assert!(stats.active <= 2);
        if stats.active == 0 && stats.pending == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "queue never settled: {stats:?}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let tasks = t.queue.list_tasks().await;
    assert_eq!(tasks.len(), ids.len());
    assert!(tasks.iter().all(|t| matches!(
        t.status,
        TaskStatus::Completed | TaskStatus::Paused
    )));
}
