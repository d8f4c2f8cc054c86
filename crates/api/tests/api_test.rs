use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use orchestrator_api::create_app;
use orchestrator_core::config::{
    DispatcherConfig, PriorityConfig, ResourcesConfig, TrackerConfig,
};
use orchestrator_core::models::{Task, TaskStatus};
use orchestrator_core::traits::CoordinationCache;
use orchestrator_dispatcher::{
    DependencyManager, OperatorController, PriorityManager, QueueNames, ResourceManager,
    RetryManager, StateTracker, TaskMonitor, TaskScheduler,
};
use orchestrator_domain::RetryPolicy;
use orchestrator_infrastructure::{InMemoryCoordinationCache, MetricsCollector};
use orchestrator_testing_utils::{
    MockFailedTaskRepository, MockMessageQueue, MockTaskRepository, TaskBuilder,
};
use serde_json::{json, Value};
use tower::ServiceExt;

struct TestApp {
    router: Router,
    repo: MockTaskRepository,
    tracker: Arc<StateTracker>,
}

async fn spawn_app(tasks: Vec<Task>) -> TestApp {
    let repo = MockTaskRepository::with_tasks(tasks);
    let queue = MockMessageQueue::new();
    let failed_repo = MockFailedTaskRepository::new();
    let cache: Arc<dyn CoordinationCache> = Arc::new(InMemoryCoordinationCache::new());
    let metrics = Arc::new(MetricsCollector::new());
    let dispatcher_config = DispatcherConfig::default();

    let resources = Arc::new(ResourceManager::new(cache.clone(), ResourcesConfig::default()));
    resources.initialize().await.unwrap();
    let dependencies = Arc::new(DependencyManager::new(cache.clone(), Arc::new(repo.clone())));
    let priority = Arc::new(PriorityManager::new(
        Arc::new(repo.clone()),
        cache.clone(),
        dependencies.clone(),
        resources.clone(),
        PriorityConfig::default(),
        Duration::from_secs(dispatcher_config.scheduling_lock_ttl_seconds),
        "api-test",
    ));
    let tracker = Arc::new(StateTracker::new(cache.clone(), TrackerConfig::default()));
    let scheduler = Arc::new(TaskScheduler::new(
        Arc::new(repo.clone()),
        Arc::new(queue.clone()),
        priority.clone(),
        resources.clone(),
        tracker.clone(),
        metrics.clone(),
        dispatcher_config,
        "crawl.sub_tasks".to_string(),
    ));
    let retry = Arc::new(RetryManager::new(
        Arc::new(repo.clone()),
        resources.clone(),
        tracker.clone(),
        metrics.clone(),
        RetryPolicy::default(),
    ));
    let monitor = Arc::new(TaskMonitor::new(
        Arc::new(repo.clone()),
        retry,
        resources.clone(),
        priority.clone(),
        tracker.clone(),
        metrics,
        500,
    ));
    let controller = Arc::new(OperatorController::new(
        scheduler,
        monitor,
        priority,
        dependencies,
        resources,
        tracker.clone(),
        Arc::new(repo.clone()),
        Arc::new(failed_repo),
        Arc::new(queue),
        QueueNames {
            sub_task: "crawl.sub_tasks".to_string(),
            result: "crawl.sub_task_results".to_string(),
            dead_letter: "crawl.dead_letters".to_string(),
        },
    ));

    TestApp {
        router: create_app(controller, true),
        repo,
        tracker,
    }
}

async fn send(app: &TestApp, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = spawn_app(Vec::new()).await;

    let (status, body) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_trigger_scan_returns_report_and_elapsed() {
    let app = spawn_app(vec![TaskBuilder::new().with_id(1).build()]).await;

    let (status, body) = send(&app, "POST", "/api/scheduler/scan", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["result"]["dispatched"], json!([1]));
    assert!(body["data"]["elapsedMs"].is_u64());
    assert_eq!(app.repo.get(1).unwrap().status, TaskStatus::Running);
}

#[tokio::test]
async fn test_trigger_monitor_reports_passes() {
    let app = spawn_app(vec![TaskBuilder::new().with_id(1).with_no_data(5, 3).build()]).await;

    let (status, body) = send(&app, "POST", "/api/monitor/run", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["result"]["autoPaused"]["actions"], 1);
    assert_eq!(app.repo.get(1).unwrap().status, TaskStatus::Paused);
}

#[tokio::test]
async fn test_stats_endpoint() {
    let app = spawn_app(vec![
        TaskBuilder::new().with_id(1).build(),
        TaskBuilder::new()
            .with_id(2)
            .with_status(TaskStatus::Failed)
            .build(),
    ])
    .await;

    let (status, body) = send(&app, "GET", "/api/stats", None).await;

    assert_eq!(status, StatusCode::OK);
    let stats = &body["data"]["result"];
    assert_eq!(stats["totalTasks"], 2);
    assert_eq!(stats["statusCounts"]["FAILED"], 1);
    assert_eq!(stats["statusCounts"]["PENDING"], 1);
}

#[tokio::test]
async fn test_stats_unavailable_when_store_is_down() {
    let app = spawn_app(vec![TaskBuilder::new().with_id(1).build()]).await;
    app.repo.set_unavailable(true);

    let (status, body) = send(&app, "GET", "/api/stats", None).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], 503);
}

#[tokio::test]
async fn test_reset_and_history() {
    let app = spawn_app(vec![TaskBuilder::new()
        .with_id(7)
        .with_status(TaskStatus::Failed)
        .with_enabled(false)
        .with_retries(3, 3)
        .build()])
    .await;

    let (status, body) = send(&app, "POST", "/api/tasks/7/reset", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["result"], true);
    assert_eq!(body["message"], "任务已重置为PENDING");

    let (_, body) = send(&app, "POST", "/api/tasks/7/reset", None).await;
    assert_eq!(body["data"]["result"], false);
    assert_eq!(body["message"], "任务当前状态不可重置");

    app.tracker.drain_pending().await;
    let (status, body) = send(&app, "GET", "/api/tasks/7/history?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    let history = body["data"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["toState"], "PENDING");
}

#[tokio::test]
async fn test_phases_after_dispatch() {
    let app = spawn_app(vec![TaskBuilder::new().with_id(3).build()]).await;
    send(&app, "POST", "/api/scheduler/scan", None).await;
    app.tracker.drain_pending().await;

    let (status, body) = send(&app, "GET", "/api/tasks/3/phases", None).await;

    assert_eq!(status, StatusCode::OK);
    let phases = body["data"].as_array().unwrap();
    assert!(phases.iter().any(|p| p["phase"] == "dispatch"));

    let (status, _) = send(&app, "GET", "/api/tasks/3/phases?limit=5000", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_history_rejects_zero_limit() {
    let app = spawn_app(Vec::new()).await;

    let (status, body) = send(&app, "GET", "/api/tasks/1/history?limit=0", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_prediction_without_samples() {
    let app = spawn_app(vec![TaskBuilder::new().with_id(1).build()]).await;

    let (status, body) = send(&app, "GET", "/api/tasks/1/prediction", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sampleSize"], 0);
}

#[tokio::test]
async fn test_dependency_lifecycle() {
    let app = spawn_app(vec![
        TaskBuilder::new().with_id(1).build(),
        TaskBuilder::new().with_id(2).build(),
    ])
    .await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/dependencies",
        Some(json!({"taskId": 2, "dependsOn": 1, "dependencyType": "finish-to-start"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "GET", "/api/tasks/2/schedulability", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["shouldSchedule"], false);

    let (_, body) = send(&app, "GET", "/api/tasks/1/dependencies", None).await;
    assert_eq!(body["data"]["dependents"], json!([2]));

    let (status, body) = send(
        &app,
        "POST",
        "/api/dependencies",
        Some(json!({"taskId": 1, "dependsOn": 2, "dependencyType": "success-to-start"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["type"], "CIRCULAR_DEPENDENCY");

    let (status, _) = send(&app, "DELETE", "/api/dependencies/2/1", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "DELETE", "/api/dependencies/2/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dependency_on_unknown_task_is_404() {
    let app = spawn_app(vec![TaskBuilder::new().with_id(1).build()]).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/dependencies",
        Some(json!({"taskId": 1, "dependsOn": 99, "dependencyType": "finish-to-start"})),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["type"], "TASK_NOT_FOUND");
}

#[tokio::test]
async fn test_invalid_max_wait_is_400() {
    let app = spawn_app(vec![
        TaskBuilder::new().with_id(1).build(),
        TaskBuilder::new().with_id(2).build(),
    ])
    .await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/dependencies",
        Some(json!({
            "taskId": 2,
            "dependsOn": 1,
            "dependencyType": "finish-to-start",
            "maxWaitTime": -5
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
