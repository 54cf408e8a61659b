//! Cancellation integration tests.
//!
//! These tests verify that cancelling a queued task keeps it from ever
//! running, that cancelling a running task stops its renderer, and that
//! cancelling anything else does nothing.

use std::time::Duration;

use stylize::core::TaskState;
use stylize::orchestration::Event;

use crate::fixtures::{
    collect_until_finished, quick_settings, state_of, wait_for_render, wait_for_state, TestEnv,
};

/// Test: A queued task cancelled before dispatch never runs
/// Given one GPU held by A and B waiting
/// When B is cancelled and A then finishes
/// Then B goes straight to cancelled and never to running
#[tokio::test]
async fn test_cancel_queued_task_never_runs() {
    let env = TestEnv::with_gpus(1);
    env.add_images("1");
    env.add_images("2");
    env.hold("1");
    let (handle, mut events) = env.start().await;

    handle.submit("1", quick_settings()).await.unwrap();
    handle.submit("2", quick_settings()).await.unwrap();
    wait_for_state(&mut events, "1", TaskState::Running).await;

    handle.cancel("2").await;
    let cancelled = wait_for_state(&mut events, "2", TaskState::Cancelled).await;
    assert_eq!(cancelled.iter, 0);
    assert_eq!(handle.current_status().await.unwrap().queue_depth, 0);

    env.release("1");
    let mut saw_b_running = false;
    let until_a_done = tokio::time::timeout(Duration::from_secs(20), async {
        loop {
            match events.recv().await {
                Ok(Event::Render(s)) if s.id.as_str() == "2" && s.state == TaskState::Running => {
                    saw_b_running = true;
                }
                Ok(Event::Render(s)) if s.id.as_str() == "1" && s.state == TaskState::Done => break,
                Ok(_) => {}
                Err(e) => panic!("Event stream ended: {}", e),
            }
        }
    })
    .await;
    assert!(until_a_done.is_ok(), "task 1 should finish");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!saw_b_running);
    assert_eq!(state_of(&handle, "2").await, Some(TaskState::Cancelled));
    assert!(!env.data_exists("2_output.png"));

    handle.shutdown();
}

/// Test: Cancelling a running task stops the renderer
/// Given a render that has reported progress and is still running
/// When it is cancelled
/// Then it ends cancelled, without the final image, and frees its slot
#[tokio::test]
async fn test_cancel_running_task() {
    let env = TestEnv::with_gpus(1);
    env.add_images("3");
    env.add_images("4");
    env.hold("3");
    let (handle, mut events) = env.start().await;

    handle.submit("3", quick_settings()).await.unwrap();
    wait_for_render(&mut events, "3", |s| s.iter == 20).await;

    handle.cancel("3").await;
    let seen = collect_until_finished(&mut events, "3").await;
    let last = seen.last().unwrap();
    assert_eq!(last.state, TaskState::Cancelled);
    assert!(!last.output_urls.iter().any(|u| u == "/data/3_output.png"));
    assert!(!env.data_exists("3_output.png"));

    // The slot is free again.
    handle.submit("4", quick_settings()).await.unwrap();
    wait_for_state(&mut events, "4", TaskState::Done).await;

    handle.shutdown();
}

/// Test: Cancellation wins over the exit status
/// Given a render that would fail once released
/// When it is cancelled while running
/// Then it ends cancelled, not failed
#[tokio::test]
async fn test_cancel_beats_failing_exit() {
    let env = TestEnv::with_gpus(1);
    env.add_images("5");
    env.hold("5");
    env.fail("5");
    let (handle, mut events) = env.start().await;

    handle.submit("5", quick_settings()).await.unwrap();
    wait_for_state(&mut events, "5", TaskState::Running).await;

    handle.cancel("5").await;
    env.release("5");
    let seen = collect_until_finished(&mut events, "5").await;
    assert!(seen.iter().all(|s| s.state != TaskState::Failed));
    assert_eq!(state_of(&handle, "5").await, Some(TaskState::Cancelled));

    handle.shutdown();
}

/// Test: Cancelling a finished task is a no-op
/// Given a task that is done
/// When it is cancelled twice
/// Then nothing changes and no event is published
#[tokio::test]
async fn test_cancel_done_task_is_noop() {
    let env = TestEnv::with_gpus(1);
    env.add_images("6");
    let (handle, mut events) = env.start().await;

    handle.submit("6", quick_settings()).await.unwrap();
    let done = wait_for_state(&mut events, "6", TaskState::Done).await;

    handle.cancel("6").await;
    handle.cancel("6").await;

    let statuses = handle.all_task_statuses().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0], done);
    while let Ok(event) = events.try_recv() {
        assert!(
            !matches!(event, Event::Render(_)),
            "unexpected render event {:?}",
            event
        );
    }

    handle.shutdown();
}

/// Test: Cancelling an unknown id is ignored
/// Given an engine with no such task
/// When an unknown or malformed id is cancelled
/// Then nothing happens
#[tokio::test]
async fn test_cancel_unknown_id_is_ignored() {
    let env = TestEnv::with_gpus(1);
    let (handle, _events) = env.start().await;

    handle.cancel("404").await;
    handle.cancel("not-an-id").await;
    assert!(handle.all_task_statuses().await.unwrap().is_empty());

    handle.shutdown();
}
