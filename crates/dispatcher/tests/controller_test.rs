mod common;

use common::{Harness, SUB_TASK_QUEUE};
use orchestrator_core::models::{DependencyEdge, DependencyType, TaskStatus};
use orchestrator_core::SchedulerError;
use orchestrator_testing_utils::TaskBuilder;

#[tokio::test]
async fn test_stats_after_scan() {
    let harness = Harness::new(vec![
        TaskBuilder::new().with_id(1).build(),
        TaskBuilder::new()
            .with_id(2)
            .with_status(TaskStatus::Failed)
            .with_enabled(false)
            .build(),
        TaskBuilder::new()
            .with_id(3)
            .with_status(TaskStatus::Paused)
            .with_enabled(false)
            .build(),
    ])
    .await;

    let scan = harness.controller.trigger_scan().await.unwrap();
    assert_eq!(scan.result.dispatched, vec![1]);

    let stats = harness.controller.get_stats().await.unwrap().result;

    assert_eq!(stats.total_tasks, 3);
    assert_eq!(stats.enabled_tasks, 1);
    assert_eq!(stats.status_counts.get("RUNNING"), Some(&1));
    assert_eq!(stats.status_counts.get("FAILED"), Some(&1));
    assert_eq!(stats.status_counts.get("PAUSED"), Some(&1));
    assert_eq!(stats.status_counts.get("PENDING"), Some(&0));
    assert_eq!(stats.queues.sub_task_queue, Some(1));
    assert_eq!(stats.queues.dead_letter_queue, Some(0));
    assert_eq!(stats.pending_review_dead_letters, 0);
    assert_eq!(stats.scheduler_counters.get("dispatched"), Some(&1));
    let slots = stats
        .resources
        .iter()
        .find(|r| r.name == "crawl_slots")
        .unwrap();
    assert_eq!(slots.current_usage, 1);
    assert_eq!(harness.queue.get_published(SUB_TASK_QUEUE).len(), 1);
}

#[tokio::test]
async fn test_stats_fail_when_store_is_down() {
    let harness = Harness::new(vec![TaskBuilder::new().with_id(1).build()]).await;
    harness.repo.set_unavailable(true);

    let result = harness.controller.get_stats().await;

    assert!(matches!(result, Err(SchedulerError::DatabaseOperation(_))));
}

#[tokio::test]
async fn test_reset_through_controller() {
    let harness = Harness::new(vec![TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Timeout)
        .with_enabled(false)
        .with_retries(3, 3)
        .build()])
    .await;

    let reset = harness.controller.reset_task(1).await.unwrap();

    assert!(reset.result);
    assert_eq!(harness.task(1).status, TaskStatus::Pending);
    harness.tracker.drain_pending().await;
    let history = harness.controller.task_history(1, Some(10)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_state, Some(TaskStatus::Timeout));
}

#[tokio::test]
async fn test_schedulability_reports_blocking_dependency() {
    let harness = Harness::new(vec![
        TaskBuilder::new().with_id(1).build(),
        TaskBuilder::new().with_id(2).build(),
    ])
    .await;
    harness
        .controller
        .add_dependency(DependencyEdge::new(2, 1, DependencyType::FinishToStart))
        .await
        .unwrap();

    let decision = harness.controller.schedulability(2).await.unwrap();

    assert!(!decision.should_schedule);
    assert_eq!(decision.blocking_factors.len(), 1);
    assert_eq!(harness.controller.dependents_of(1).await.unwrap(), vec![2]);
    assert!(harness.controller.remove_dependency(2, 1).await.unwrap());
    assert!(harness.controller.schedulability(2).await.unwrap().should_schedule);
}
