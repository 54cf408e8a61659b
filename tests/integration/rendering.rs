//! Render supervision integration tests.
//!
//! These tests verify the events a render produces while it runs and the
//! final state it lands in.

use stylize::core::TaskState;
use stylize::orchestration::Engine;

use crate::fixtures::{collect_until_finished, quick_settings, wait_for_state, TestEnv};

/// Test: Progress is monotonic and bounded
/// Given a 20-iteration render printing every iteration
/// When it runs to completion
/// Then iter never decreases and never exceeds 20
#[tokio::test]
async fn test_progress_events_are_monotonic() {
    let env = TestEnv::with_gpus(1);
    env.add_images("1");
    let (handle, mut events) = env.start().await;

    handle.submit("1", quick_settings()).await.unwrap();
    let seen = collect_until_finished(&mut events, "1").await;

    let iters: Vec<u32> = seen.iter().map(|s| s.iter).collect();
    assert!(iters.windows(2).all(|w| w[0] <= w[1]), "iters: {:?}", iters);
    assert!(iters.iter().all(|&i| i <= 20));
    assert_eq!(seen.first().unwrap().state, TaskState::Queued);
    assert_eq!(seen.last().unwrap().state, TaskState::Done);
    assert_eq!(seen.last().unwrap().iter, 20);

    handle.shutdown();
}

/// Test: Output URLs follow the checkpoints
/// Given a render saving every 2 iterations
/// When progress events arrive
/// Then each lists exactly the checkpoints below the current iteration,
/// and the final event adds the finished image
#[tokio::test]
async fn test_output_urls_follow_checkpoints() {
    let env = TestEnv::with_gpus(1);
    env.add_images("2");
    let (handle, mut events) = env.start().await;

    handle.submit("2", quick_settings()).await.unwrap();
    let seen = collect_until_finished(&mut events, "2").await;

    for status in seen.iter().filter(|s| s.state == TaskState::Running) {
        let expected: Vec<String> = (1..)
            .map(|k| k * 2)
            .take_while(|&i| i < status.iter)
            .map(|i| format!("/data/2_output_{}.png", i))
            .collect();
        assert_eq!(status.output_urls, expected, "at iter {}", status.iter);
    }

    let done = seen.last().unwrap();
    assert_eq!(done.output_urls.len(), 10);
    assert_eq!(done.output_urls[0], "/data/2_output_2.png");
    assert_eq!(done.output_urls[8], "/data/2_output_18.png");
    assert_eq!(done.output_urls[9], "/data/2_output.png");
    assert!(env.data_exists("2_output.png"));
    assert!(env.data_exists("2_output_18.png"));

    handle.shutdown();
}

/// Test: Non-zero exit marks the task failed
/// Given a renderer that exits 1
/// When the task runs
/// Then it ends failed without the final image URL
#[tokio::test]
async fn test_failing_render_is_failed() {
    let env = TestEnv::with_gpus(1);
    env.add_images("3");
    env.fail("3");
    let (handle, mut events) = env.start().await;

    handle.submit("3", quick_settings()).await.unwrap();
    let failed = wait_for_state(&mut events, "3", TaskState::Failed).await;
    assert_eq!(failed.iter, 20);
    assert!(!failed
        .output_urls
        .iter()
        .any(|u| u == "/data/3_output.png"));

    handle.shutdown();
}

/// Test: A failure frees the slot
/// Given one GPU and a failing task followed by a good one
/// When both are submitted
/// Then the second still runs to completion
#[tokio::test]
async fn test_failure_releases_slot() {
    let env = TestEnv::with_gpus(1);
    env.add_images("4");
    env.add_images("5");
    env.fail("4");
    let (handle, mut events) = env.start().await;

    handle.submit("4", quick_settings()).await.unwrap();
    handle.submit("5", quick_settings()).await.unwrap();
    wait_for_state(&mut events, "4", TaskState::Failed).await;
    wait_for_state(&mut events, "5", TaskState::Done).await;

    let status = handle.current_status().await.unwrap();
    assert_eq!(status.queue_depth, 0);

    handle.shutdown();
}

/// Test: A renderer that cannot be launched
/// Given a renderer binary that does not exist
/// When a task is dispatched
/// Then it fails and the slot is released
#[tokio::test]
async fn test_missing_renderer_fails_task() {
    let mut env = TestEnv::with_gpus(1);
    env.config.renderer = Some("/nonexistent/bin/th".to_string());
    env.add_images("6");
    env.add_images("7");

    let engine = Engine::new(&env.config).await.unwrap();
    let mut events = engine.subscribe();
    let handle = engine.start();

    handle.submit("6", quick_settings()).await.unwrap();
    handle.submit("7", quick_settings()).await.unwrap();
    let failed = wait_for_state(&mut events, "6", TaskState::Failed).await;
    assert_eq!(failed.iter, 0);
    wait_for_state(&mut events, "7", TaskState::Failed).await;

    handle.shutdown();
}
