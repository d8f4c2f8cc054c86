//! 运维控制入口
//!
//! HTTP 层只调用这里的同步方法，每个操作返回结果以及耗时。

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use orchestrator_core::models::{
    CompletionPrediction, DependencyEdge, PhaseRecord, ResourceConstraint, StateTransitionRecord,
    TaskFilter, TaskStatus, TransitionPatterns,
};
use orchestrator_core::traits::{FailedTaskRepository, MessageQueue, TaskRepository};
use orchestrator_core::SchedulerResult;
use serde::Serialize;
use tracing::{info, warn};

use crate::dependency_manager::DependencyManager;
use crate::monitor::{MonitorReport, TaskMonitor};
use crate::priority_manager::{PriorityManager, SchedulingDecision};
use crate::resource_manager::ResourceManager;
use crate::scheduler::{ScanReport, TaskScheduler};
use crate::state_tracker::StateTracker;

/// 带耗时的操作结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedResult<T> {
    pub result: T,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub sub_task_queue: Option<u32>,
    pub result_queue: Option<u32>,
    pub dead_letter_queue: Option<u32>,
    pub priority_queue_depth: u64,
}

/// 系统概况
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStats {
    pub total_tasks: i64,
    pub enabled_tasks: i64,
    pub status_counts: BTreeMap<String, i64>,
    pub queues: QueueSnapshot,
    pub resources: Vec<ResourceConstraint>,
    pub pending_review_dead_letters: i64,
    pub scheduler_counters: HashMap<String, i64>,
}

/// 队列名称，用于统计队列深度
#[derive(Debug, Clone)]
pub struct QueueNames {
    pub sub_task: String,
    pub result: String,
    pub dead_letter: String,
}

pub struct OperatorController {
    scheduler: Arc<TaskScheduler>,
    monitor: Arc<TaskMonitor>,
    priority: Arc<PriorityManager>,
    dependencies: Arc<DependencyManager>,
    resources: Arc<ResourceManager>,
    tracker: Arc<StateTracker>,
    task_repo: Arc<dyn TaskRepository>,
    failed_task_repo: Arc<dyn FailedTaskRepository>,
    message_queue: Arc<dyn MessageQueue>,
    queues: QueueNames,
}

impl OperatorController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        monitor: Arc<TaskMonitor>,
        priority: Arc<PriorityManager>,
        dependencies: Arc<DependencyManager>,
        resources: Arc<ResourceManager>,
        tracker: Arc<StateTracker>,
        task_repo: Arc<dyn TaskRepository>,
        failed_task_repo: Arc<dyn FailedTaskRepository>,
        message_queue: Arc<dyn MessageQueue>,
        queues: QueueNames,
    ) -> Self {
        Self {
            scheduler,
            monitor,
            priority,
            dependencies,
            resources,
            tracker,
            task_repo,
            failed_task_repo,
            message_queue,
            queues,
        }
    }

    /// 立即执行一次扫描调度
    pub async fn trigger_scan(&self) -> SchedulerResult<TimedResult<ScanReport>> {
        info!("运维触发扫描调度");
        timed(self.scheduler.scan_and_dispatch()).await
    }

    /// 立即执行一轮巡检
    pub async fn trigger_monitor(&self) -> TimedResult<MonitorReport> {
        info!("运维触发巡检");
        let started = Instant::now();
        let result = self.monitor.run_once().await;
        TimedResult {
            result,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub async fn reset_task(&self, task_id: i64) -> SchedulerResult<TimedResult<bool>> {
        info!(task_id, "运维重置任务");
        timed(self.monitor.reset_failed_task(task_id)).await
    }

    pub async fn get_stats(&self) -> SchedulerResult<TimedResult<SystemStats>> {
        timed(self.collect_stats()).await
    }

    async fn collect_stats(&self) -> SchedulerResult<SystemStats> {
        let mut status_counts = BTreeMap::new();
        let mut total_tasks = 0;
        for status in TaskStatus::ALL {
            let count = self
                .task_repo
                .count(&TaskFilter::default().with_status(status))
                .await?;
            total_tasks += count;
            status_counts.insert(status.to_string(), count);
        }
        let enabled_tasks = self
            .task_repo
            .count(&TaskFilter::default().with_enabled(true))
            .await?;

        let queues = QueueSnapshot {
            sub_task_queue: self.queue_size(&self.queues.sub_task).await,
            result_queue: self.queue_size(&self.queues.result).await,
            dead_letter_queue: self.queue_size(&self.queues.dead_letter).await,
            priority_queue_depth: self.priority.queue_depth().await?,
        };

        Ok(SystemStats {
            total_tasks,
            enabled_tasks,
            status_counts,
            queues,
            resources: self.resources.constraints().await?,
            pending_review_dead_letters: self.failed_task_repo.count_pending_review().await?,
            scheduler_counters: self.priority.scheduler_metrics().await?,
        })
    }

    /// 队列不可达时返回 None，不影响其余统计
    async fn queue_size(&self, queue: &str) -> Option<u32> {
        match self.message_queue.get_queue_size(queue).await {
            Ok(size) => Some(size),
            Err(e) => {
                warn!("获取队列 {} 深度失败: {}", queue, e);
                None
            }
        }
    }

    pub async fn task_history(
        &self,
        task_id: i64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<StateTransitionRecord>> {
        self.tracker.history(task_id, limit).await
    }

    pub async fn task_phases(
        &self,
        task_id: i64,
        limit: Option<usize>,
    ) -> SchedulerResult<Vec<PhaseRecord>> {
        self.tracker.phases(task_id, limit).await
    }

    pub async fn task_prediction(&self, task_id: i64) -> SchedulerResult<CompletionPrediction> {
        self.tracker.predict_completion(task_id, Utc::now()).await
    }

    pub async fn transition_patterns(
        &self,
        task_id: Option<i64>,
    ) -> SchedulerResult<TransitionPatterns> {
        self.tracker.analyze_patterns(task_id).await
    }

    /// 预览调度决策，不加锁也不预留资源
    pub async fn schedulability(&self, task_id: i64) -> SchedulerResult<SchedulingDecision> {
        self.priority.preview(task_id).await
    }

    pub async fn add_dependency(&self, edge: DependencyEdge) -> SchedulerResult<()> {
        self.dependencies.add_dependency(edge).await
    }

    pub async fn remove_dependency(&self, task_id: i64, depends_on: i64) -> SchedulerResult<bool> {
        self.dependencies.remove_dependency(task_id, depends_on).await
    }

    pub async fn dependencies_of(&self, task_id: i64) -> SchedulerResult<Vec<DependencyEdge>> {
        self.dependencies.get_dependencies(task_id).await
    }

    pub async fn dependents_of(&self, task_id: i64) -> SchedulerResult<Vec<i64>> {
        self.dependencies.get_dependents(task_id).await
    }
}

async fn timed<T, F>(future: F) -> SchedulerResult<TimedResult<T>>
where
    F: Future<Output = SchedulerResult<T>>,
{
    let started = Instant::now();
    let result = future.await?;
    Ok(TimedResult {
        result,
        elapsed_ms: started.elapsed().as_millis() as u64,
    })
}
