mod common;

use chrono::{Duration, Utc};
use common::{Harness, DEAD_LETTER_QUEUE, RESULT_QUEUE, SUB_TASK_QUEUE};
use orchestrator_core::models::message::{
    HEADER_DEATH_COUNT, HEADER_LAST_ERROR, HEADER_ORIGINAL_QUEUE,
};
use orchestrator_core::models::{
    FailedTaskStatus, Message, MessageType, SubTaskMessage, TaskStatus,
};
use orchestrator_core::time_utils::truncate_to_minute;
use orchestrator_dispatcher::consumer::QueueConsumer;
use orchestrator_dispatcher::ResultOutcome;
use orchestrator_testing_utils::{SubTaskResultBuilder, TaskBuilder};
use serde_json::json;
use tokio::sync::broadcast;

#[tokio::test]
async fn test_successful_initial_crawl_advances_high_water_mark() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_retries(2, 3)
        .with_no_data(1, 3)
        .with_error_message("上次失败")
        .build();
    let start_date = task.start_date;
    let harness = Harness::new(vec![task]).await;
    harness.resources.reserve_resources(1).await.unwrap();

    let window_end = truncate_to_minute(Utc::now());
    let result = SubTaskResultBuilder::new(1)
        .with_window(start_date, window_end)
        .with_data_count(25)
        .initial()
        .build();
    let outcome = harness.results.handle_result(&result).await.unwrap();

    assert_eq!(outcome, ResultOutcome::Applied(TaskStatus::Pending));
    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.latest_crawl_time, Some(window_end));
    assert_eq!(task.current_crawl_time, Some(window_end));
    assert_eq!(task.progress, 1);
    assert_eq!(task.no_data_count, 0);
    assert_eq!(task.retry_count, 0);
    assert!(task.error_message.is_none());
    assert!(task.last_succeeded_at.is_some());
    assert!(task.last_completed_at.is_some());
    assert!(task.next_run_at.unwrap() > Utc::now() + Duration::minutes(59));
    assert_eq!(harness.crawl_slots_in_use().await, 0);
}

#[tokio::test]
async fn test_oversized_interval_result_is_applied_then_scan_fails_task() {
    let latest = truncate_to_minute(Utc::now() - Duration::hours(2));
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .steady_state(latest)
        .with_interval("99999999w")
        .build();
    let harness = Harness::new(vec![task]).await;
    harness.resources.reserve_resources(1).await.unwrap();

    let window_end = truncate_to_minute(Utc::now());
    let result = SubTaskResultBuilder::new(1)
        .with_window(latest, window_end)
        .with_data_count(3)
        .build();
    let outcome = harness.results.handle_result(&result).await.unwrap();

    assert_eq!(outcome, ResultOutcome::Applied(TaskStatus::Pending));
    let task = harness.task(1);
    assert_eq!(task.latest_crawl_time, Some(window_end));
    assert!(task.next_run_at.is_none());
    assert_eq!(harness.crawl_slots_in_use().await, 0);

    let report = harness.scheduler.scan_and_dispatch().await.unwrap();
    assert_eq!(report.contract_violations, vec![1]);
    assert!(!harness.task(1).enabled);
    assert!(harness.queue.get_published(SUB_TASK_QUEUE).is_empty());
}

#[tokio::test]
async fn test_lagging_task_is_due_again_immediately() {
    let latest = truncate_to_minute(Utc::now() - Duration::days(90));
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_start_date(latest - Duration::days(1))
        .steady_state(latest)
        .with_next_run_at(Some(Utc::now() + Duration::hours(1)))
        .build();
    let harness = Harness::new(vec![task]).await;

    let result = SubTaskResultBuilder::new(1)
        .with_window(latest, latest + Duration::days(30))
        .build();
    harness.results.handle_result(&result).await.unwrap();

    let task = harness.task(1);
    assert_eq!(task.latest_crawl_time, Some(latest + Duration::days(30)));
    assert!(task.next_run_at.unwrap() <= Utc::now());
}

#[tokio::test]
async fn test_high_water_mark_never_moves_backwards() {
    let latest = truncate_to_minute(Utc::now() - Duration::minutes(10));
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .steady_state(latest)
        .build();
    let harness = Harness::new(vec![task]).await;

    let result = SubTaskResultBuilder::new(1)
        .with_window(latest - Duration::hours(2), latest - Duration::hours(1))
        .build();
    harness.results.handle_result(&result).await.unwrap();

    assert_eq!(harness.task(1).latest_crawl_time, Some(latest));
}

#[tokio::test]
async fn test_empty_window_increments_no_data_count() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_no_data(1, 3)
        .build();
    let harness = Harness::new(vec![task]).await;

    let result = SubTaskResultBuilder::new(1).with_data_count(0).build();
    harness.results.handle_result(&result).await.unwrap();

    assert_eq!(harness.task(1).no_data_count, 2);
}

#[tokio::test]
async fn test_failed_result_marks_task_failed() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_retries(1, 3)
        .build();
    let harness = Harness::new(vec![task]).await;
    harness.resources.reserve_resources(1).await.unwrap();

    let result = SubTaskResultBuilder::new(1).failed("账号被封禁").build();
    let outcome = harness.results.handle_result(&result).await.unwrap();

    assert_eq!(outcome, ResultOutcome::Applied(TaskStatus::Failed));
    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.enabled);
    assert_eq!(task.error_message.as_deref(), Some("账号被封禁"));
    assert!(task.last_completed_at.is_some());
    assert!(task.last_succeeded_at.is_none());
    assert_eq!(harness.crawl_slots_in_use().await, 0);
}

#[tokio::test]
async fn test_failed_result_without_retries_disables_task() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .with_retries(3, 3)
        .build();
    let harness = Harness::new(vec![task]).await;

    let result = SubTaskResultBuilder::new(1).failed("timeout").build();
    harness.results.handle_result(&result).await.unwrap();

    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(!task.enabled);
}

#[tokio::test]
async fn test_stale_result_is_ignored_and_acked() {
    let task = TaskBuilder::new().with_id(1).build();
    let harness = Harness::new(vec![task.clone()]).await;
    let message = Message::sub_task_result(&SubTaskResultBuilder::new(1).build()).unwrap();
    let message_id = message.id.clone();
    harness.queue.add_message_to_queue(RESULT_QUEUE, message);

    let consumed = harness.results.process_batch().await.unwrap();

    assert_eq!(consumed, 1);
    assert_eq!(harness.queue.get_acked_messages(), vec![message_id]);
    assert_eq!(harness.task(1), task);
}

#[tokio::test]
async fn test_result_for_missing_task_is_acked() {
    let harness = Harness::new(Vec::new()).await;
    let result = SubTaskResultBuilder::new(404).build();

    let outcome = harness.results.handle_result(&result).await.unwrap();

    assert!(matches!(outcome, ResultOutcome::Ignored(_)));
}

#[tokio::test]
async fn test_malformed_result_is_dead_lettered() {
    let harness = Harness::new(Vec::new()).await;
    let message = Message::new(MessageType::SubTaskResult, json!({"taskId": "not-a-number"}));
    let message_id = message.id.clone();
    harness.queue.add_message_to_queue(RESULT_QUEUE, message);

    harness.results.process_batch().await.unwrap();

    assert_eq!(harness.queue.get_nacked_messages(), vec![(message_id, false)]);
    assert!(harness.queue.get_acked_messages().is_empty());
}

#[tokio::test]
async fn test_store_outage_requeues_result() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .build();
    let harness = Harness::new(vec![task]).await;
    harness.repo.set_unavailable(true);
    let message = Message::sub_task_result(&SubTaskResultBuilder::new(1).build()).unwrap();
    let message_id = message.id.clone();
    harness.queue.add_message_to_queue(RESULT_QUEUE, message);

    harness.results.process_batch().await.unwrap();

    assert_eq!(harness.queue.get_nacked_messages(), vec![(message_id, true)]);
}

#[tokio::test]
async fn test_dispatch_then_result_round_trip() {
    let harness = Harness::new(vec![TaskBuilder::new().with_id(1).build()]).await;
    harness.scheduler.scan_and_dispatch().await.unwrap();
    assert_eq!(harness.crawl_slots_in_use().await, 1);

    let sub_task: SubTaskMessage = harness.queue.get_published(SUB_TASK_QUEUE)[0]
        .decode()
        .unwrap();
    let result = SubTaskResultBuilder::new(1)
        .with_window(sub_task.start, sub_task.end)
        .with_data_count(3)
        .initial()
        .build();
    harness
        .queue
        .add_message_to_queue(RESULT_QUEUE, Message::sub_task_result(&result).unwrap());

    harness.results.process_batch().await.unwrap();

    let task = harness.task(1);
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.latest_crawl_time, Some(sub_task.end));
    assert_eq!(harness.crawl_slots_in_use().await, 0);

    harness.tracker.drain_pending().await;
    let history = harness.tracker.history(1, None).await.unwrap();
    let states: Vec<TaskStatus> = history.iter().map(|r| r.to_state).collect();
    assert_eq!(states.len(), 2);
    assert!(states.contains(&TaskStatus::Running));
    assert!(states.contains(&TaskStatus::Pending));
}

#[tokio::test]
async fn test_listener_stops_on_shutdown() {
    let task = TaskBuilder::new()
        .with_id(1)
        .with_status(TaskStatus::Running)
        .build();
    let harness = Harness::new(vec![task]).await;
    harness.queue.add_message_to_queue(
        RESULT_QUEUE,
        Message::sub_task_result(&SubTaskResultBuilder::new(1).build()).unwrap(),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let stop = async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();
    };
    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        tokio::join!(harness.results.run(shutdown_rx), stop)
    })
    .await
    .expect("listener should stop after shutdown");

    assert!(!harness.results.is_running().await);
    assert_eq!(harness.task(1).status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_dead_letter_is_persisted_for_review() {
    let harness = Harness::new(Vec::new()).await;
    let message = Message::new(MessageType::CrawlSubTask, json!({"taskId": 5, "keyword": "洪水"}))
        .with_header(HEADER_ORIGINAL_QUEUE, SUB_TASK_QUEUE)
        .with_header(HEADER_DEATH_COUNT, 4)
        .with_header(HEADER_LAST_ERROR, "message ttl expired");
    let message_id = message.id.clone();
    harness.queue.add_message_to_queue(DEAD_LETTER_QUEUE, message);

    let consumed = harness.dead_letters.process_batch().await.unwrap();

    assert_eq!(consumed, 1);
    let records = harness.failed_repo.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.message_id, message_id);
    assert_eq!(record.original_queue, SUB_TASK_QUEUE);
    assert_eq!(record.failure_count, 4);
    assert_eq!(record.last_error.as_deref(), Some("message ttl expired"));
    assert_eq!(record.payload["keyword"], "洪水");
    assert_eq!(record.status, FailedTaskStatus::PendingReview);
    assert_eq!(harness.queue.get_acked_messages(), vec![message_id]);
    assert!(harness.queue.get_published(SUB_TASK_QUEUE).is_empty());
}

#[tokio::test]
async fn test_dead_letter_write_failure_requeues() {
    let harness = Harness::new(Vec::new()).await;
    harness.failed_repo.set_fail_writes(true);
    let message = Message::new(MessageType::CrawlSubTask, json!({}));
    let message_id = message.id.clone();
    harness.queue.add_message_to_queue(DEAD_LETTER_QUEUE, message);

    harness.dead_letters.process_batch().await.unwrap();

    assert!(harness.failed_repo.records().is_empty());
    assert_eq!(harness.queue.get_nacked_messages(), vec![(message_id, true)]);
}
