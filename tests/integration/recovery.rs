//! Startup recovery integration tests.
//!
//! These tests verify that an engine started over an existing data
//! directory rebuilds its task list from the artifacts alone.

use stylize::core::{RenderSettings, TaskState};
use stylize::orchestration::Event;

use crate::fixtures::{quick_settings, wait_for_state, TestEnv};

fn write_settings(env: &TestEnv, id: &str, settings: &RenderSettings) {
    env.write_data(
        &format!("{}_settings.json", id),
        &serde_json::to_vec(settings).unwrap(),
    );
}

/// Test: A finished render is recovered as done
/// Given settings, content, style and final output for task 7
/// When the engine starts
/// Then task 7 is done with iter equal to numIterations
#[tokio::test]
async fn test_recover_done_task() {
    let env = TestEnv::with_gpus(1);
    write_settings(&env, "7", &RenderSettings::default());
    env.add_images("7");
    env.write_data("7_output.png", b"png");

    let (handle, _events) = env.start().await;
    let statuses = handle.all_task_statuses().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].id.as_str(), "7");
    assert_eq!(statuses[0].state, TaskState::Done);
    assert_eq!(statuses[0].iter, 1000);
    assert_eq!(
        statuses[0].output_urls.last().map(String::as_str),
        Some("/data/7_output.png")
    );

    handle.shutdown();
}

/// Test: An interrupted render is recovered as failed
/// Given the same files but no final output, with two checkpoints
/// When the engine starts
/// Then task 7 is failed at the newest checkpoint, lists both checkpoints,
/// and never re-runs
#[tokio::test]
async fn test_recover_interrupted_task_as_failed() {
    let env = TestEnv::with_gpus(1);
    write_settings(&env, "7", &RenderSettings::default());
    env.add_images("7");
    env.write_data("7_output_100.png", b"png");
    env.write_data("7_output_200.png", b"png");

    let (handle, _events) = env.start().await;
    let statuses = handle.all_task_statuses().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, TaskState::Failed);
    assert_eq!(statuses[0].iter, 200);
    assert_eq!(
        statuses[0].output_urls,
        vec!["/data/7_output_100.png", "/data/7_output_200.png"]
    );
    assert_eq!(handle.current_status().await.unwrap().queue_depth, 0);

    handle.shutdown();
}

/// Test: Recovered tasks are published at startup
/// Given two recoverable tasks
/// When the engine starts
/// Then one render event per task is published, oldest first
#[tokio::test]
async fn test_recovered_tasks_are_published() {
    let env = TestEnv::with_gpus(1);
    for id in ["1", "2"] {
        write_settings(&env, id, &RenderSettings::default());
        env.add_images(id);
    }
    env.write_data("2_output.png", b"png");

    let (handle, mut events) = env.start().await;
    let mut published = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::Render(status) = event {
            published.push((status.id.as_str().to_string(), status.state));
        }
    }
    assert_eq!(
        published,
        vec![
            ("1".to_string(), TaskState::Failed),
            ("2".to_string(), TaskState::Done),
        ]
    );

    handle.shutdown();
}

/// Test: Incomplete and malformed groups are skipped
/// Given one group missing its style image, one with corrupt settings,
/// and one complete group
/// When the engine starts
/// Then only the complete group is recovered
#[tokio::test]
async fn test_recovery_skips_bad_groups() {
    let env = TestEnv::with_gpus(1);
    write_settings(&env, "1", &RenderSettings::default());
    env.write_data("1_content.jpg", b"jpg");

    env.write_data("2_settings.json", b"{\"numIterations\": ");
    env.add_images("2");

    write_settings(&env, "3", &RenderSettings::default());
    env.add_images("3");

    env.write_data("notes.txt", b"not an artifact");

    let (handle, _events) = env.start().await;
    let ids: Vec<String> = handle
        .all_task_statuses()
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.id.as_str().to_string())
        .collect();
    assert_eq!(ids, vec!["3"]);

    handle.shutdown();
}

/// Test: Status survives a restart
/// Given a task rendered by one engine
/// When a second engine starts over the same data directory
/// Then it recovers that task as done with the same settings
#[tokio::test]
async fn test_restart_recovers_rendered_task() {
    let env = TestEnv::with_gpus(1);
    env.add_images("12");

    let (first, mut events) = env.start().await;
    first.submit("12", quick_settings()).await.unwrap();
    let done = wait_for_state(&mut events, "12", TaskState::Done).await;
    first.shutdown();

    let (second, _events) = env.start().await;
    let statuses = second.all_task_statuses().await.unwrap();
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].state, TaskState::Done);
    assert_eq!(statuses[0].settings, done.settings);
    assert_eq!(statuses[0].output_urls, done.output_urls);

    second.shutdown();
}
