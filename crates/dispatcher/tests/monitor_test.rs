mod common;

use chrono::{Duration, Utc};
use common::Harness;
use orchestrator_core::models::TaskStatus;
use orchestrator_dispatcher::{RecoveryAction, ReservationOutcome};
use orchestrator_testing_utils::TaskBuilder;

#[tokio::test]
async fn test_stale_running_task_is_requeued() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_retries(0, 3)
        .with_updated_at(Utc::now() - Duration::minutes(35))
        .build();
    let harness = Harness::new(vec![task]).await;

    let before = Utc::now();
    let report = harness.monitor.run_once().await;

    assert_eq!(report.timeouts.examined, 1);
    assert_eq!(report.timeouts.actions, 1);
    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 1);
    assert!(task.enabled);
    let next_run_at = task.next_run_at.unwrap();
    assert!(next_run_at >= before + Duration::minutes(5));
    assert!(next_run_at <= Utc::now() + Duration::minutes(5));
}

#[tokio::test]
async fn test_stale_running_task_without_retries_times_out() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_retries(3, 3)
        .with_updated_at(Utc::now() - Duration::minutes(35))
        .build();
    let harness = Harness::new(vec![task]).await;

    harness.monitor.run_once().await;

    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Timeout);
    assert!(!task.enabled);
    assert!(task.error_message.is_some());
}

#[tokio::test]
async fn test_recent_running_task_is_left_alone() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_updated_at(Utc::now() - Duration::minutes(10))
        .build();
    let harness = Harness::new(vec![task]).await;

    let report = harness.monitor.run_once().await;

    assert_eq!(report.timeouts.examined, 0);
    assert_eq!(harness.task(1).status, TaskStatus::Running);
}

#[tokio::test]
async fn test_timeout_releases_reserved_resources() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_updated_at(Utc::now() - Duration::minutes(45))
        .build();
    let harness = Harness::new(vec![task]).await;
    let reserved = harness.resources.reserve_resources(1).await.unwrap();
    assert!(matches!(reserved, ReservationOutcome::Reserved(_)));
    assert_eq!(harness.crawl_slots_in_use().await, 1);

    harness.monitor.run_once().await;

    assert_eq!(harness.crawl_slots_in_use().await, 0);
}

#[tokio::test]
async fn test_failed_task_is_retried_after_backoff() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Failed)
        .with_retries(2, 3)
        .with_error_message("worker crashed")
        .with_updated_at(Utc::now() - Duration::minutes(25))
        .build();
    let harness = Harness::new(vec![task]).await;

    let report = harness.monitor.run_once().await;

    assert_eq!(report.retries.actions, 1);
    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 3);
    assert!(task.next_run_at.unwrap() <= Utc::now());
}

#[tokio::test]
async fn test_failed_task_waits_for_backoff() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Failed)
        .with_retries(2, 3)
        .with_updated_at(Utc::now() - Duration::minutes(10))
        .build();
    let harness = Harness::new(vec![task.clone()]).await;

    let action = harness.retry.handle_failed(&task, Utc::now()).await.unwrap();

    match action {
        RecoveryAction::Waiting { remaining_secs } => {
            assert!(remaining_secs > 9 * 60 && remaining_secs <= 10 * 60)
        }
        other => panic!("expected waiting, got {other:?}"),
    }
    assert_eq!(harness.task(1).status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_exhausted_failed_task_is_never_retried() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Failed)
        .with_retries(3, 3)
        .with_updated_at(Utc::now() - Duration::days(2))
        .build();
    let harness = Harness::new(vec![task]).await;

    let report = harness.monitor.run_once().await;

    assert_eq!(report.retries.examined, 0);
    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 3);
}

#[tokio::test]
async fn test_starved_keyword_is_auto_paused() {
    let harness = Harness::new(vec![
        TaskBuilder::new().with_id(1).with_no_data(3, 3).build(),
        TaskBuilder::new().with_id(2).with_no_data(2, 3).build(),
    ])
    .await;

    let report = harness.monitor.run_once().await;

    assert_eq!(report.auto_paused.actions, 1);
    let paused = harness.task(1);
    assert_eq!(paused.status, TaskStatus::Paused);
    assert!(!paused.enabled);
    assert!(paused.error_message.unwrap().contains("自动暂停"));
    assert_eq!(harness.task(2).status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_reconcile_releases_leaked_reservation() {
    let harness = Harness::new(vec![TaskBuilder::new().with_id(1).build()]).await;
    harness.resources.reserve_resources(1).await.unwrap();

    let report = harness.monitor.run_once().await;

    assert_eq!(report.reconciled.actions, 1);
    assert_eq!(harness.crawl_slots_in_use().await, 0);
}

#[tokio::test]
async fn test_reconcile_keeps_running_reservation() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .build();
    let harness = Harness::new(vec![task]).await;
    harness.resources.reserve_resources(1).await.unwrap();

    let report = harness.monitor.run_once().await;

    assert_eq!(report.reconciled.actions, 0);
    assert_eq!(harness.crawl_slots_in_use().await, 1);
}

#[tokio::test]
async fn test_passes_are_isolated_when_store_is_down() {
    let harness = Harness::new(vec![TaskBuilder::new().with_id(1).build()]).await;
    harness.repo.set_unavailable(true);

    let report = harness.monitor.run_once().await;

    assert!(report.timeouts.failed);
    assert!(report.retries.failed);
    assert!(report.auto_paused.failed);
    assert!(!report.reconciled.failed);
}

#[tokio::test]
async fn test_reset_pending_task_is_noop() {
    let task = TaskBuilder::new().with_id(1).with_retries(1, 3).build();
    let harness = Harness::new(vec![task.clone()]).await;

    let reset = harness.monitor.reset_failed_task(1).await.unwrap();

    assert!(!reset);
    assert_eq!(harness.task(1), task);
}

#[tokio::test]
async fn test_reset_failed_task_clears_state() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Failed)
        .with_enabled(false)
        .with_retries(3, 3)
        .with_no_data(2, 5)
        .with_error_message("boom")
        .build();
    let harness = Harness::new(vec![task]).await;

    let reset = harness.monitor.reset_failed_task(1).await.unwrap();

    assert!(reset);
    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.no_data_count, 0);
    assert!(task.enabled);
    assert!(task.error_message.is_none());
    assert!(task.next_run_at.unwrap() <= Utc::now());
}

#[tokio::test]
async fn test_reset_missing_task_returns_false() {
    let harness = Harness::new(Vec::new()).await;
    assert!(!harness.monitor.reset_failed_task(99).await.unwrap());
}
