//! 监控巡检
//!
//! 每个周期依次执行超时回收、失败重试、无数据自动暂停和资源对账，
//! 各个阶段互相隔离，一个阶段失败不影响其他阶段。

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_core::models::{StateTransitionRecord, Task, TaskFilter, TaskStatus, TaskUpdate};
use orchestrator_core::traits::TaskRepository;
use orchestrator_core::SchedulerResult;
use orchestrator_domain::ensure_transition;
use orchestrator_infrastructure::MetricsCollector;
use serde::Serialize;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::priority_manager::PriorityManager;
use crate::resource_manager::ResourceManager;
use crate::retry_service::RetryManager;
use crate::state_tracker::StateTracker;

/// 单个巡检阶段的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub examined: usize,
    pub actions: usize,
    pub errors: usize,
    /// 整个阶段因基础设施错误中断
    pub failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PassReport {
    fn aborted(error: String) -> Self {
        Self {
            failed: true,
            error: Some(error),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorReport {
    pub timeouts: PassReport,
    pub retries: PassReport,
    pub auto_paused: PassReport,
    pub reconciled: PassReport,
    pub duration_ms: u64,
}

pub struct TaskMonitor {
    task_repo: Arc<dyn TaskRepository>,
    retry: Arc<RetryManager>,
    resources: Arc<ResourceManager>,
    priority: Arc<PriorityManager>,
    tracker: Arc<StateTracker>,
    metrics: Arc<MetricsCollector>,
    batch_limit: i64,
}

impl TaskMonitor {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        retry: Arc<RetryManager>,
        resources: Arc<ResourceManager>,
        priority: Arc<PriorityManager>,
        tracker: Arc<StateTracker>,
        metrics: Arc<MetricsCollector>,
        batch_limit: i64,
    ) -> Self {
        Self {
            task_repo,
            retry,
            resources,
            priority,
            tracker,
            metrics,
            batch_limit,
        }
    }

    /// 执行一轮完整巡检
    pub async fn run_once(&self) -> MonitorReport {
        let started = std::time::Instant::now();
        let now = Utc::now();

        let report = MonitorReport {
            timeouts: isolate("timeout", self.reclaim_timeouts(now)).await,
            retries: isolate("retry", self.retry_failed(now)).await,
            auto_paused: isolate("auto_pause", self.pause_starved()).await,
            reconciled: isolate("reconcile", self.reconcile_allocations()).await,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            "巡检完成: 超时回收 {}，失败重试 {}，自动暂停 {}，资源对账 {}，耗时 {}ms",
            report.timeouts.actions,
            report.retries.actions,
            report.auto_paused.actions,
            report.reconciled.actions,
            report.duration_ms
        );
        report
    }

    async fn reclaim_timeouts(&self, now: DateTime<Utc>) -> SchedulerResult<PassReport> {
        let filter = TaskFilter::default()
            .with_status(TaskStatus::Running)
            .updated_before(self.retry.policy().stale_cutoff(now))
            .with_limit(self.batch_limit);
        let tasks = self.task_repo.find(&filter).await?;

        let mut pass = PassReport {
            examined: tasks.len(),
            ..PassReport::default()
        };
        for task in tasks {
            match self.retry.handle_timeout(&task, now).await {
                Ok(action) if action.is_action() => pass.actions += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(task_id = task.id, "超时回收失败: {}", e);
                    pass.errors += 1;
                }
            }
        }
        Ok(pass)
    }

    async fn retry_failed(&self, now: DateTime<Utc>) -> SchedulerResult<PassReport> {
        let filter = TaskFilter::default()
            .with_status(TaskStatus::Failed)
            .with_enabled(true)
            .retryable()
            .with_limit(self.batch_limit);
        let tasks = self.task_repo.find(&filter).await?;

        let mut pass = PassReport {
            examined: tasks.len(),
            ..PassReport::default()
        };
        for task in tasks {
            match self.retry.handle_failed(&task, now).await {
                Ok(action) if action.is_action() => pass.actions += 1,
                Ok(_) => {}
                Err(e) => {
                    warn!(task_id = task.id, "失败重试处理出错: {}", e);
                    pass.errors += 1;
                }
            }
        }
        Ok(pass)
    }

    async fn pause_starved(&self) -> SchedulerResult<PassReport> {
        let filter = TaskFilter::default()
            .with_statuses(vec![
                TaskStatus::Pending,
                TaskStatus::Failed,
                TaskStatus::Timeout,
            ])
            .no_data_exceeded()
            .with_limit(self.batch_limit);
        let tasks = self.task_repo.find(&filter).await?;

        let mut pass = PassReport {
            examined: tasks.len(),
            ..PassReport::default()
        };
        for task in tasks {
            match self.pause_task(&task).await {
                Ok(true) => pass.actions += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(task_id = task.id, "自动暂停失败: {}", e);
                    pass.errors += 1;
                }
            }
        }
        Ok(pass)
    }

    async fn pause_task(&self, task: &Task) -> SchedulerResult<bool> {
        ensure_transition(task.status, TaskStatus::Paused)?;
        let message = format!(
            "连续 {} 次未抓取到数据（阈值 {}），已自动暂停",
            task.no_data_count, task.no_data_threshold
        );
        let fields = TaskUpdate::new()
            .enabled(false)
            .error_message(Some(message.clone()));
        let affected = self
            .task_repo
            .conditional_transition(
                task.id,
                task.status,
                Some(task.updated_at),
                TaskStatus::Paused,
                &fields,
            )
            .await?;
        if affected == 0 {
            return Ok(false);
        }

        self.tracker.record_transition(
            StateTransitionRecord::new(task.id, Some(task.status), TaskStatus::Paused, message)
                .with_metadata("no_data_count", task.no_data_count),
        );
        self.metrics.record_auto_pause();
        info!(task_id = task.id, "关键词 {} 长期无数据，已自动暂停", task.keyword);
        Ok(true)
    }

    /// 释放不在运行、也没有调度锁的任务遗留的资源预留
    async fn reconcile_allocations(&self) -> SchedulerResult<PassReport> {
        let task_ids = self.resources.allocated_task_ids().await?;
        let mut pass = PassReport {
            examined: task_ids.len(),
            ..PassReport::default()
        };

        for task_id in task_ids {
            let result: SchedulerResult<bool> = async {
                let running = matches!(
                    self.task_repo.get_by_id(task_id).await?,
                    Some(task) if task.status == TaskStatus::Running
                );
                if running || self.priority.is_locked(task_id).await? {
                    return Ok(false);
                }
                self.resources.release_resources(task_id).await
            }
            .await;

            match result {
                Ok(true) => {
                    debug!(task_id, "对账释放遗留资源");
                    pass.actions += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(task_id, "资源对账失败: {}", e);
                    pass.errors += 1;
                }
            }
        }
        Ok(pass)
    }

    /// 人工重置 FAILED/TIMEOUT 任务
    ///
    /// 任务不存在或状态不可重置时返回 false 且不做任何修改。
    pub async fn reset_failed_task(&self, task_id: i64) -> SchedulerResult<bool> {
        let Some(task) = self.task_repo.get_by_id(task_id).await? else {
            return Ok(false);
        };
        if !task.status.is_resettable() {
            debug!(task_id, "任务状态 {} 不允许重置", task.status);
            return Ok(false);
        }
        ensure_transition(task.status, TaskStatus::Pending)?;

        let fields = TaskUpdate::new()
            .error_message(None)
            .retry_count(0)
            .no_data_count(0)
            .enabled(true)
            .next_run_at(Some(Utc::now()));
        let affected = self
            .task_repo
            .conditional_transition(task_id, task.status, None, TaskStatus::Pending, &fields)
            .await?;
        if affected == 0 {
            return Ok(false);
        }

        self.tracker.record_transition(StateTransitionRecord::new(
            task_id,
            Some(task.status),
            TaskStatus::Pending,
            "人工重置",
        ));
        info!(task_id, "任务已人工重置为PENDING");
        Ok(true)
    }
}

async fn isolate<F>(pass: &'static str, future: F) -> PassReport
where
    F: Future<Output = SchedulerResult<PassReport>>,
{
    match future.instrument(info_span!("monitor_pass", pass)).await {
        Ok(report) => report,
        Err(e) => {
            warn!("巡检阶段 {} 中断: {}", pass, e);
            PassReport::aborted(e.to_string())
        }
    }
}
