#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::config::{
    DispatcherConfig, PriorityConfig, ResourcesConfig, TrackerConfig,
};
use orchestrator_core::models::Task;
use orchestrator_core::traits::CoordinationCache;
use orchestrator_dispatcher::{
    DeadLetterConsumer, DependencyManager, OperatorController, PriorityManager, QueueNames,
    ResourceManager, ResultListener, RetryManager, StateTracker, TaskMonitor, TaskScheduler,
};
use orchestrator_domain::{RetryPolicy, WindowPolicy};
use orchestrator_infrastructure::{InMemoryCoordinationCache, MetricsCollector};
use orchestrator_testing_utils::{MockFailedTaskRepository, MockMessageQueue, MockTaskRepository};

pub const SUB_TASK_QUEUE: &str = "crawl.sub_tasks";
pub const RESULT_QUEUE: &str = "crawl.sub_task_results";
pub const DEAD_LETTER_QUEUE: &str = "crawl.dead_letters";

/// 用内存实现组装全部组件
pub struct Harness {
    pub repo: MockTaskRepository,
    pub failed_repo: MockFailedTaskRepository,
    pub queue: MockMessageQueue,
    pub cache: Arc<dyn CoordinationCache>,
    pub resources: Arc<ResourceManager>,
    pub dependencies: Arc<DependencyManager>,
    pub priority: Arc<PriorityManager>,
    pub tracker: Arc<StateTracker>,
    pub scheduler: Arc<TaskScheduler>,
    pub retry: Arc<RetryManager>,
    pub monitor: Arc<TaskMonitor>,
    pub results: ResultListener,
    pub dead_letters: DeadLetterConsumer,
    pub controller: OperatorController,
}

impl Harness {
    pub async fn new(tasks: Vec<Task>) -> Self {
        Self::with_resources(tasks, ResourcesConfig::default()).await
    }

    pub async fn with_resources(tasks: Vec<Task>, resources_config: ResourcesConfig) -> Self {
        let repo = MockTaskRepository::with_tasks(tasks);
        let cache: Arc<dyn CoordinationCache> = Arc::new(InMemoryCoordinationCache::new());
        Self::assemble(repo, cache, resources_config, "scheduler-test").await
    }

    /// 与另一个实例共享任务存储和协调缓存，模拟多实例部署
    pub async fn sibling(&self, instance_id: &str) -> Self {
        Self::assemble(
            self.repo.clone(),
            self.cache.clone(),
            ResourcesConfig::default(),
            instance_id,
        )
        .await
    }

    async fn assemble(
        repo: MockTaskRepository,
        cache: Arc<dyn CoordinationCache>,
        resources_config: ResourcesConfig,
        instance_id: &str,
    ) -> Self {
        let failed_repo = MockFailedTaskRepository::new();
        let queue = MockMessageQueue::new();
        let metrics = Arc::new(MetricsCollector::new());
        let dispatcher_config = DispatcherConfig::default();

        let resources = Arc::new(ResourceManager::new(cache.clone(), resources_config));
        resources.initialize().await.unwrap();
        let dependencies = Arc::new(DependencyManager::new(cache.clone(), Arc::new(repo.clone())));
        let priority = Arc::new(PriorityManager::new(
            Arc::new(repo.clone()),
            cache.clone(),
            dependencies.clone(),
            resources.clone(),
            PriorityConfig::default(),
            Duration::from_secs(dispatcher_config.scheduling_lock_ttl_seconds),
            instance_id,
        ));
        let tracker = Arc::new(StateTracker::new(cache.clone(), TrackerConfig::default()));

        let scheduler = Arc::new(TaskScheduler::new(
            Arc::new(repo.clone()),
            Arc::new(queue.clone()),
            priority.clone(),
            resources.clone(),
            tracker.clone(),
            metrics.clone(),
            dispatcher_config.clone(),
            SUB_TASK_QUEUE.to_string(),
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
            retry.clone(),
            resources.clone(),
            priority.clone(),
            tracker.clone(),
            metrics.clone(),
            500,
        ));
        let results = ResultListener::new(
            Arc::new(repo.clone()),
            Arc::new(queue.clone()),
            resources.clone(),
            priority.clone(),
            tracker.clone(),
            metrics.clone(),
            WindowPolicy::from_config(&dispatcher_config),
            RESULT_QUEUE.to_string(),
            10,
            Duration::from_millis(10),
        );
        let dead_letters = DeadLetterConsumer::new(
            Arc::new(failed_repo.clone()),
            Arc::new(queue.clone()),
            metrics.clone(),
            DEAD_LETTER_QUEUE.to_string(),
            10,
            Duration::from_millis(10),
        );
        let controller = OperatorController::new(
            scheduler.clone(),
            monitor.clone(),
            priority.clone(),
            dependencies.clone(),
            resources.clone(),
            tracker.clone(),
            Arc::new(repo.clone()),
            Arc::new(failed_repo.clone()),
            Arc::new(queue.clone()),
            QueueNames {
                sub_task: SUB_TASK_QUEUE.to_string(),
                result: RESULT_QUEUE.to_string(),
                dead_letter: DEAD_LETTER_QUEUE.to_string(),
            },
        );

        Self {
            repo,
            failed_repo,
            queue,
            cache,
            resources,
            dependencies,
            priority,
            tracker,
            scheduler,
            retry,
            monitor,
            results,
            dead_letters,
            controller,
        }
    }

    pub fn task(&self, id: i64) -> Task {
        self.repo.get(id).expect("task should exist")
    }

    pub async fn crawl_slots_in_use(&self) -> i64 {
        self.resources
            .constraint("crawl_slots")
            .await
            .unwrap()
            .current_usage
    }
}
