//! End-to-end pipeline runs over scripted collaborators: completion, retry,
//! failure, and cancellation.

use std::sync::atomic::Ordering;
use std::time::Duration;

use super::{wait_for_release, wait_for_terminal};
use crate::types::{Event, JobState, JobStatus};
use crate::uploader::test_helpers::{
    create_test_manager, default_payload, test_config, MockFetcher, UploadOutcome, USER,
};

#[tokio::test]
async fn three_volume_job_completes_in_order() {
    let fetcher = MockFetcher::new("data.bin", default_payload());
    let (manager, sink, factory) = create_test_manager(test_config(), fetcher, vec![]).await;
    let mut events = manager.subscribe();
    manager.start_queue_processor();

    manager.submit(USER, "http://example.org/data").await.unwrap();

    let Event::JobCompleted { user_id, parts } = wait_for_terminal(&mut events).await else {
        panic!("expected completion");
    };
    assert_eq!(user_id, USER);
    assert_eq!(parts.len(), 3);
    // download links pair with volumes in upload order
    let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        ["data.bin.zip.0001", "data.bin.zip.0002", "data.bin.zip.0003"]
    );
    let urls: Vec<&str> = parts.iter().map(|p| p.download_url.as_str()).collect();
    assert_eq!(
        urls,
        [
            "https://s3.example/obj/1",
            "https://s3.example/obj/2",
            "https://s3.example/obj/3"
        ]
    );
    // one login per volume, one upload per volume
    assert_eq!(factory.logins.load(Ordering::SeqCst), 3);
    assert_eq!(factory.uploads.load(Ordering::SeqCst), 3);

    let results = sink.results.lock().unwrap();
    assert_eq!(results.len(), 1);
    let (reported_parts, filename, total_size) = &results[0];
    assert_eq!(reported_parts, &parts);
    assert_eq!(filename, "data.bin");
    assert_eq!(*total_size, 2560);
    drop(results);

    // step lands exactly on the volume count
    let progress = sink.progress.lock().unwrap();
    let last = progress.last().expect("progress was reported");
    assert_eq!(last.step, 3.0);
    assert_eq!(last.total_parts, 3);
    assert_eq!(last.total_size, 2560);
    drop(progress);

    // the slot frees up and the user can go again
    wait_for_release(&manager, USER).await;
    manager.submit(USER, "http://example.org/more").await.unwrap();
}

// Paused time skips the retry backoff without shortening it
#[tokio::test(start_paused = true)]
async fn transient_upload_failure_is_retried_once() {
    let fetcher = MockFetcher::new("data.bin", default_payload());
    // volume 1 succeeds, volume 2 fails once then succeeds
    let script = vec![
        UploadOutcome::Succeed,
        UploadOutcome::Fail,
        UploadOutcome::Succeed,
        UploadOutcome::Succeed,
    ];
    let (manager, _sink, factory) = create_test_manager(test_config(), fetcher, script).await;
    let mut events = manager.subscribe();
    manager.start_queue_processor();

    manager.submit(USER, "http://example.org/data").await.unwrap();

    let Event::JobCompleted { parts, .. } = wait_for_terminal(&mut events).await else {
        panic!("expected completion after retry");
    };
    assert_eq!(parts.len(), 3);
    // 3 volumes + 1 retry, each attempt with its own login
    assert_eq!(factory.uploads.load(Ordering::SeqCst), 4);
    assert_eq!(factory.logins.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn persistent_upload_failure_fails_the_job() {
    let fetcher = MockFetcher::new("data.bin", default_payload());
    // volume 1 fails on both attempts
    let script = vec![UploadOutcome::Fail, UploadOutcome::Fail];
    let (manager, sink, factory) = create_test_manager(test_config(), fetcher, script).await;
    let mut events = manager.subscribe();
    manager.start_queue_processor();

    manager.submit(USER, "http://example.org/data").await.unwrap();

    let Event::JobFailed { reason, .. } = wait_for_terminal(&mut events).await else {
        panic!("expected failure");
    };
    assert!(reason.contains("volume 1"), "reason: {reason}");
    assert_eq!(factory.uploads.load(Ordering::SeqCst), 2);
    assert_eq!(sink.failures.lock().unwrap().len(), 1);

    // a failed job releases its slot like any other terminal state
    wait_for_release(&manager, USER).await;
}

#[tokio::test]
async fn fetch_failure_fails_the_job_before_any_upload() {
    let (manager, sink, factory) =
        create_test_manager(test_config(), MockFetcher::failing(), vec![]).await;
    let mut events = manager.subscribe();
    manager.start_queue_processor();

    manager.submit(USER, "http://example.org/huge").await.unwrap();

    let Event::JobFailed { reason, .. } = wait_for_terminal(&mut events).await else {
        panic!("expected failure");
    };
    assert!(reason.contains("too big"), "reason: {reason}");
    assert_eq!(factory.uploads.load(Ordering::SeqCst), 0);
    assert_eq!(sink.failures.lock().unwrap().len(), 1);
    wait_for_release(&manager, USER).await;
}

#[tokio::test]
async fn cancel_mid_upload_settles_in_canceled() {
    let fetcher = MockFetcher::new("data.bin", default_payload());
    // volume 1 completes; volume 2 parks until the abort flag trips
    let script = vec![UploadOutcome::Succeed, UploadOutcome::Block];
    let (manager, sink, factory) = create_test_manager(test_config(), fetcher, script).await;
    let mut events = manager.subscribe();
    manager.start_queue_processor();

    manager.submit(USER, "http://example.org/data").await.unwrap();

    // wait until the second volume is in flight (logged in, step 1.5)
    let mut running = false;
    for _ in 0..500 {
        if let Some(JobStatus::Running(p)) = manager.status(USER) {
            if p.step >= 1.5 {
                running = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(running, "job never reached the second volume");

    manager.cancel(USER).unwrap();

    let Event::JobCanceled { user_id } = wait_for_terminal(&mut events).await else {
        panic!("expected cancellation");
    };
    assert_eq!(user_id, USER);
    assert_eq!(factory.uploads.load(Ordering::SeqCst), 2);
    assert_eq!(sink.failures.lock().unwrap()[0], "upload canceled");
    assert!(sink.results.lock().unwrap().is_empty());

    // canceled jobs release the slot; the user can immediately resubmit
    wait_for_release(&manager, USER).await;
    manager.submit(USER, "http://example.org/again").await.unwrap();
}

#[tokio::test]
async fn progress_snapshot_tracks_pipeline_states() {
    let fetcher = MockFetcher::new("data.bin", default_payload());
    let (manager, sink, _factory) = create_test_manager(test_config(), fetcher, vec![]).await;
    let mut events = manager.subscribe();
    manager.start_queue_processor();

    manager.submit(USER, "http://example.org/data").await.unwrap();
    wait_for_terminal(&mut events).await;

    let progress = sink.progress.lock().unwrap();
    // fetch-complete snapshot: step advanced from -2.0 to -1.0
    assert_eq!(progress[0].state, JobState::Fetching);
    assert_eq!(progress[0].step, -1.0);
    assert_eq!(progress[0].total_size, 2560);
    // chunk-complete snapshot: step at 0.0 with the volume count known
    assert_eq!(progress[1].state, JobState::Splitting);
    assert_eq!(progress[1].step, 0.0);
    assert_eq!(progress[1].total_parts, 3);
    // steps never move backwards
    for pair in progress.windows(2) {
        assert!(pair[1].step >= pair[0].step);
    }
}
