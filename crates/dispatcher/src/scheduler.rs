use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use orchestrator_core::config::DispatcherConfig;
use orchestrator_core::models::{
    ExecutionPhase, Message, PhaseRecord, StateTransitionRecord, Task, TaskStatus, TaskUpdate,
};
use orchestrator_core::traits::{MessageQueue, TaskRepository};
use orchestrator_core::time_utils::checked_after;
use orchestrator_core::SchedulerResult;
use orchestrator_domain::{ensure_transition, WindowPlan, WindowPolicy};
use orchestrator_infrastructure::MetricsCollector;
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::priority_manager::PriorityManager;
use crate::resource_manager::ResourceManager;
use crate::state_tracker::StateTracker;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedTask {
    pub task_id: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedDispatch {
    pub task_id: i64,
    pub error: String,
}

/// 一次扫描调度的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub scanned: usize,
    pub dispatched: Vec<i64>,
    pub skipped: Vec<SkippedTask>,
    pub failed: Vec<FailedDispatch>,
    /// 自上次爬取以来没有新时间段，只推迟了下次运行时间
    pub nothing_new: Vec<i64>,
    /// 因违反上游约定被强制置为 FAILED
    pub contract_violations: Vec<i64>,
    /// 条件更新失败，其他调度器抢先处理
    pub lost_races: Vec<i64>,
    /// 调度过程中被删除
    pub deleted: Vec<i64>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum DispatchOutcome {
    Dispatched,
    Skipped(String),
    NothingNew,
    ContractViolation,
    LostRace,
    Deleted,
    PublishFailed(String),
    Failed(String),
}

/// 扫描调度器
///
/// 每个周期查询到期任务，按优先级顺序在有限并发下逐个准入、乐观更新为 RUNNING
/// 并下发子任务。单个任务的任何失败都只影响该任务。
pub struct TaskScheduler {
    task_repo: Arc<dyn TaskRepository>,
    message_queue: Arc<dyn MessageQueue>,
    priority: Arc<PriorityManager>,
    resources: Arc<ResourceManager>,
    tracker: Arc<StateTracker>,
    metrics: Arc<MetricsCollector>,
    window_policy: WindowPolicy,
    config: DispatcherConfig,
    sub_task_queue: String,
}

impl TaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        message_queue: Arc<dyn MessageQueue>,
        priority: Arc<PriorityManager>,
        resources: Arc<ResourceManager>,
        tracker: Arc<StateTracker>,
        metrics: Arc<MetricsCollector>,
        config: DispatcherConfig,
        sub_task_queue: String,
    ) -> Self {
        Self {
            task_repo,
            message_queue,
            priority,
            resources,
            tracker,
            metrics,
            window_policy: WindowPolicy::from_config(&config),
            config,
            sub_task_queue,
        }
    }

    /// 扫描到期任务并下发子任务
    pub async fn scan_and_dispatch(&self) -> SchedulerResult<ScanReport> {
        self.scan_and_dispatch_inner()
            .instrument(info_span!("scan_and_schedule"))
            .await
    }

    async fn scan_and_dispatch_inner(&self) -> SchedulerResult<ScanReport> {
        let started = Instant::now();
        let now = Utc::now();

        let candidates = self
            .task_repo
            .find_due(now, self.config.scan_batch_limit)
            .await?;
        let mut report = ScanReport {
            scanned: candidates.len(),
            ..ScanReport::default()
        };
        if candidates.is_empty() {
            debug!("没有到期的任务");
            report.duration_ms = started.elapsed().as_millis() as u64;
            self.metrics.record_scan(started.elapsed().as_secs_f64());
            return Ok(report);
        }

        let ordered = self.prioritize(candidates, now).await;
        info!("本轮扫描发现 {} 个到期任务", ordered.len());

        let outcomes: Vec<(i64, DispatchOutcome)> = stream::iter(ordered)
            .map(|task| async move {
                let task_id = task.id;
                let outcome = self
                    .dispatch_task(task, now)
                    .instrument(info_span!("dispatch_task", task_id))
                    .await;
                (task_id, outcome)
            })
            .buffer_unordered(self.config.max_concurrent_dispatches.max(1))
            .collect()
            .await;

        for (task_id, outcome) in outcomes {
            match outcome {
                DispatchOutcome::Dispatched => report.dispatched.push(task_id),
                DispatchOutcome::Skipped(reason) => {
                    report.skipped.push(SkippedTask { task_id, reason })
                }
                DispatchOutcome::NothingNew => report.nothing_new.push(task_id),
                DispatchOutcome::ContractViolation => report.contract_violations.push(task_id),
                DispatchOutcome::LostRace => report.lost_races.push(task_id),
                DispatchOutcome::Deleted => report.deleted.push(task_id),
                DispatchOutcome::PublishFailed(error) | DispatchOutcome::Failed(error) => {
                    report.failed.push(FailedDispatch { task_id, error })
                }
            }
        }
        report.dispatched.sort_unstable();

        if let Ok(depth) = self.priority.queue_depth().await {
            self.metrics.update_priority_queue_depth(depth as f64);
        }
        let elapsed = started.elapsed();
        self.metrics.record_scan(elapsed.as_secs_f64());
        report.duration_ms = elapsed.as_millis() as u64;

        info!(
            "扫描完成: 发现 {}，下发 {}，跳过 {}，失败 {}，耗时 {}ms",
            report.scanned,
            report.dispatched.len(),
            report.skipped.len(),
            report.failed.len(),
            report.duration_ms
        );
        Ok(report)
    }

    /// 计算优先级并通过优先级队列排序
    ///
    /// 弹出的 id 不在本批次内的忽略；未弹出的任务按查询顺序排在后面。
    async fn prioritize(&self, candidates: Vec<Task>, now: DateTime<Utc>) -> Vec<Task> {
        let ids: Vec<i64> = candidates.iter().map(|t| t.id).collect();
        for task in &candidates {
            let assessment = self.priority.calculate_priority(task, now).await;
            let anchor = task.next_run_at.unwrap_or(task.created_at);
            if let Err(e) = self
                .priority
                .enqueue(task.id, assessment.priority, anchor)
                .await
            {
                warn!(task_id = task.id, "写入优先级队列失败: {}", e);
            }
        }

        let popped = match self.priority.dequeue_batch(candidates.len()).await {
            Ok(popped) => popped,
            Err(e) => {
                warn!("读取优先级队列失败，按到期顺序处理: {}", e);
                return candidates;
            }
        };

        let mut by_id: HashMap<i64, Task> = candidates.into_iter().map(|t| (t.id, t)).collect();
        let mut ordered = Vec::with_capacity(by_id.len());
        for id in popped {
            if let Some(task) = by_id.remove(&id) {
                ordered.push(task);
            }
        }
        for id in ids {
            if let Some(task) = by_id.remove(&id) {
                ordered.push(task);
            }
        }
        ordered
    }

    async fn dispatch_task(&self, task: Task, now: DateTime<Utc>) -> DispatchOutcome {
        if task.status == TaskStatus::Running {
            debug!(task_id = task.id, "任务已在运行，跳过");
            return DispatchOutcome::Skipped("任务已在运行".to_string());
        }

        let decision = match self.priority.can_schedule(task.id).await {
            Ok(decision) => decision,
            Err(e) => {
                warn!(task_id = task.id, "准入检查失败: {}", e);
                return DispatchOutcome::Failed(e.to_string());
            }
        };

        if !decision.should_schedule {
            let label = decision.denial.map(|d| d.label()).unwrap_or("unknown");
            debug!(task_id = task.id, "跳过任务: {}", decision.reason);
            self.metrics.record_skip(label);
            self.priority.bump_scheduler_metric("skipped", 1).await;
            self.tracker.record_phase(PhaseRecord::new(
                task.id,
                ExecutionPhase::Admission,
                Some(decision.reason.clone()),
            ));
            return DispatchOutcome::Skipped(decision.reason);
        }

        let outcome = self.dispatch_admitted(&task, now).await;

        if !matches!(outcome, DispatchOutcome::Dispatched) {
            if let Err(e) = self.resources.release_resources(task.id).await {
                warn!(task_id = task.id, "释放资源失败: {}", e);
            }
        }
        self.priority.release_lock(task.id).await;
        outcome
    }

    async fn dispatch_admitted(&self, task: &Task, now: DateTime<Utc>) -> DispatchOutcome {
        let next_run_at = match task
            .interval()
            .and_then(|interval| checked_after(now, interval))
        {
            Ok(next_run_at) => next_run_at,
            Err(e) => return self.force_fail(task, e.to_string()).await,
        };

        let window = match self.window_policy.plan(task, now) {
            WindowPlan::ContractViolation(message) => {
                return self.force_fail(task, message).await
            }
            WindowPlan::NothingNew => return self.postpone(task, next_run_at).await,
            WindowPlan::Dispatch(window) => window,
        };

        let sub_task = window.to_message(task);
        if let Err(e) = sub_task.validate() {
            return self.force_fail(task, e.to_string()).await;
        }
        if let Err(e) = ensure_transition(task.status, TaskStatus::Running) {
            return DispatchOutcome::Failed(e.to_string());
        }

        let mut fields = TaskUpdate::new();
        if let Some(total) = window.total_segments {
            fields = fields.total_segments(total);
        }
        if !window.is_initial_crawl {
            fields = fields.next_run_at(Some(next_run_at));
        }

        let affected = match self
            .task_repo
            .conditional_transition(
                task.id,
                TaskStatus::Pending,
                Some(task.updated_at),
                TaskStatus::Running,
                &fields,
            )
            .await
        {
            Ok(affected) => affected,
            Err(e) => {
                warn!(task_id = task.id, "更新任务为RUNNING失败: {}", e);
                return DispatchOutcome::Failed(e.to_string());
            }
        };
        if affected == 0 {
            return self.resolve_lost_race(task).await;
        }

        let message = match Message::sub_task(&sub_task) {
            Ok(message) => message,
            Err(e) => return self.rollback_publish(task, now, e.to_string()).await,
        };

        match self
            .message_queue
            .publish_message(&self.sub_task_queue, &message)
            .await
        {
            Ok(true) => {
                self.tracker.record_transition(
                    StateTransitionRecord::new(
                        task.id,
                        Some(TaskStatus::Pending),
                        TaskStatus::Running,
                        "子任务已下发",
                    )
                    .with_metadata("window_start", window.start.to_rfc3339())
                    .with_metadata("window_end", window.end.to_rfc3339())
                    .with_metadata("message_id", &message.id),
                );
                self.tracker.record_phase(PhaseRecord::new(
                    task.id,
                    ExecutionPhase::Dispatch,
                    Some(format!("{} ~ {}", window.start, window.end)),
                ));
                self.metrics.record_dispatch();
                self.priority.bump_scheduler_metric("dispatched", 1).await;
                info!(
                    task_id = task.id,
                    "下发子任务 [{} ~ {}]，首次爬取: {}",
                    window.start,
                    window.end,
                    window.is_initial_crawl
                );
                DispatchOutcome::Dispatched
            }
            Ok(false) => {
                self.rollback_publish(task, now, "消息队列未确认子任务消息".to_string())
                    .await
            }
            Err(e) => self.rollback_publish(task, now, e.to_string()).await,
        }
    }

    /// 违反上游约定：强制失败并禁用，等待运维处理
    async fn force_fail(&self, task: &Task, message: String) -> DispatchOutcome {
        error!(task_id = task.id, "任务违反调度约定，强制失败: {}", message);
        if let Err(e) = ensure_transition(task.status, TaskStatus::Failed) {
            return DispatchOutcome::Failed(e.to_string());
        }

        let fields = TaskUpdate::new()
            .enabled(false)
            .error_message(Some(message.clone()));
        match self
            .task_repo
            .conditional_transition(task.id, task.status, None, TaskStatus::Failed, &fields)
            .await
        {
            Ok(0) => DispatchOutcome::LostRace,
            Ok(_) => {
                self.tracker.record_transition(StateTransitionRecord::new(
                    task.id,
                    Some(task.status),
                    TaskStatus::Failed,
                    message,
                ));
                self.priority
                    .bump_scheduler_metric("contract_violations", 1)
                    .await;
                DispatchOutcome::ContractViolation
            }
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }

    async fn postpone(&self, task: &Task, next_run_at: DateTime<Utc>) -> DispatchOutcome {
        debug!(task_id = task.id, "没有新的时间段，推迟到 {}", next_run_at);
        let fields = TaskUpdate::new().next_run_at(Some(next_run_at));
        match self
            .task_repo
            .conditional_transition(task.id, TaskStatus::Pending, None, TaskStatus::Pending, &fields)
            .await
        {
            Ok(0) => DispatchOutcome::LostRace,
            Ok(_) => DispatchOutcome::NothingNew,
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }

    async fn resolve_lost_race(&self, task: &Task) -> DispatchOutcome {
        match self.task_repo.get_by_id(task.id).await {
            Ok(None) => {
                warn!(task_id = task.id, "任务在调度过程中被删除");
                self.tracker.record_transition(StateTransitionRecord::new(
                    task.id,
                    Some(task.status),
                    TaskStatus::Failed,
                    "调度过程中任务被删除",
                ));
                DispatchOutcome::Deleted
            }
            Ok(Some(current)) => {
                debug!(
                    task_id = task.id,
                    "任务状态已被其他调度器修改为 {}，放弃本轮",
                    current.status
                );
                DispatchOutcome::LostRace
            }
            Err(e) => DispatchOutcome::Failed(e.to_string()),
        }
    }

    /// 发布失败：回滚为 PENDING 并设置短暂冷却，避免热循环
    async fn rollback_publish(
        &self,
        task: &Task,
        now: DateTime<Utc>,
        reason: String,
    ) -> DispatchOutcome {
        warn!(task_id = task.id, "子任务发布失败，回滚为PENDING: {}", reason);
        self.metrics.record_publish_failure();
        self.priority.bump_scheduler_metric("publish_failures", 1).await;

        let cooldown = Duration::seconds(self.config.publish_failure_cooldown_seconds);
        let fields = TaskUpdate::new()
            .next_run_at(Some(now + cooldown))
            .error_message(Some(format!("子任务发布失败: {reason}")));
        match self
            .task_repo
            .conditional_transition(task.id, TaskStatus::Running, None, TaskStatus::Pending, &fields)
            .await
        {
            Ok(affected) => {
                if affected > 0 {
                    self.tracker.record_transition(StateTransitionRecord::new(
                        task.id,
                        Some(TaskStatus::Running),
                        TaskStatus::Pending,
                        format!("发布失败回滚: {reason}"),
                    ));
                } else {
                    warn!(task_id = task.id, "回滚时任务已不是RUNNING");
                }
            }
            Err(e) => {
                // 回滚失败时由超时回收兜底
                error!(task_id = task.id, "回滚任务失败: {}", e);
            }
        }
        DispatchOutcome::PublishFailed(reason)
    }
}
