//! 优先级与准入控制
//!
//! `can_schedule` 依次检查任务状态、依赖、资源，再获取单任务调度锁并预留资源；
//! 拒绝只是跳过原因，不是错误。优先级队列存放在协调缓存的有序集合中。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use orchestrator_core::config::PriorityConfig;
use orchestrator_core::models::{BlockingDependency, ResourceAllocation, Task, TaskStatus};
use orchestrator_core::traits::{CoordinationCache, TaskRepository};
use orchestrator_core::SchedulerResult;
use orchestrator_domain::{PriorityAssessment, PriorityCalculator, PriorityContext, TaskPriority};
use serde::Serialize;
use tracing::{debug, warn};

use crate::dependency_manager::DependencyManager;
use crate::resource_manager::{ReservationOutcome, ResourceManager, ResourceShortfall};

const PRIORITY_QUEUE_KEY: &str = "priority:queue";
const TASK_VOLUME_KEY: &str = "metrics:task_volume";
const SCHEDULER_METRICS_KEY: &str = "metrics:scheduler";

/// 同一优先级内按时间排序所用的跨度，需大于任意 Unix 秒数
const PRIORITY_BAND: f64 = 1e10;

fn lock_key(task_id: i64) -> String {
    format!("lock:schedule:{task_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    TaskMissing,
    NotPending,
    Disabled,
    NotDue,
    DependencyUnmet,
    ResourceInsufficient,
    LockContention,
}

impl DenialKind {
    pub fn label(&self) -> &'static str {
        match self {
            DenialKind::TaskMissing => "task_missing",
            DenialKind::NotPending => "not_pending",
            DenialKind::Disabled => "disabled",
            DenialKind::NotDue => "not_due",
            DenialKind::DependencyUnmet => "dependency_unmet",
            DenialKind::ResourceInsufficient => "resource_insufficient",
            DenialKind::LockContention => "lock_contention",
        }
    }
}

/// 准入决策
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingDecision {
    pub should_schedule: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denial: Option<DenialKind>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocking_factors: Vec<BlockingDependency>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_shortfalls: Vec<ResourceShortfall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_allocation: Option<ResourceAllocation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<PriorityAssessment>,
}

impl SchedulingDecision {
    fn deny(kind: DenialKind, reason: impl Into<String>) -> Self {
        Self {
            should_schedule: false,
            reason: reason.into(),
            denial: Some(kind),
            blocking_factors: Vec::new(),
            resource_shortfalls: Vec::new(),
            resource_allocation: None,
            priority: None,
        }
    }

    fn approve(reason: impl Into<String>) -> Self {
        Self {
            should_schedule: true,
            reason: reason.into(),
            denial: None,
            blocking_factors: Vec::new(),
            resource_shortfalls: Vec::new(),
            resource_allocation: None,
            priority: None,
        }
    }

    fn with_priority(mut self, priority: Option<PriorityAssessment>) -> Self {
        self.priority = priority;
        self
    }
}

pub struct PriorityManager {
    task_repo: Arc<dyn TaskRepository>,
    cache: Arc<dyn CoordinationCache>,
    dependencies: Arc<DependencyManager>,
    resources: Arc<ResourceManager>,
    calculator: PriorityCalculator,
    lock_ttl: Duration,
    instance_id: String,
}

impl PriorityManager {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        cache: Arc<dyn CoordinationCache>,
        dependencies: Arc<DependencyManager>,
        resources: Arc<ResourceManager>,
        config: PriorityConfig,
        lock_ttl: Duration,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            task_repo,
            cache,
            dependencies,
            resources,
            calculator: PriorityCalculator::new(config),
            lock_ttl,
            instance_id: instance_id.into(),
        }
    }

    /// 完整准入：通过时已持有调度锁并完成资源预留
    ///
    /// 调用方在分发结束后必须调用 `release_lock`。
    pub async fn can_schedule(&self, task_id: i64) -> SchedulerResult<SchedulingDecision> {
        self.evaluate(task_id, Utc::now(), true).await
    }

    /// 只读预览，不获取锁也不预留资源
    pub async fn preview(&self, task_id: i64) -> SchedulerResult<SchedulingDecision> {
        self.evaluate(task_id, Utc::now(), false).await
    }

    async fn evaluate(
        &self,
        task_id: i64,
        now: DateTime<Utc>,
        commit: bool,
    ) -> SchedulerResult<SchedulingDecision> {
        let Some(task) = self.task_repo.get_by_id(task_id).await? else {
            return Ok(SchedulingDecision::deny(
                DenialKind::TaskMissing,
                format!("任务 {task_id} 不存在"),
            ));
        };

        if task.status != TaskStatus::Pending {
            return Ok(SchedulingDecision::deny(
                DenialKind::NotPending,
                format!("任务状态为 {}，不是 PENDING", task.status),
            ));
        }
        if !task.enabled {
            return Ok(SchedulingDecision::deny(DenialKind::Disabled, "任务已禁用"));
        }
        if let Some(next_run_at) = task.next_run_at {
            if next_run_at > now {
                return Ok(SchedulingDecision::deny(
                    DenialKind::NotDue,
                    format!("下次运行时间 {next_run_at} 尚未到达"),
                ));
            }
        }

        let priority = Some(self.calculate_priority(&task, now).await);

        let blocking = self.dependencies.check_dependencies(task_id, now).await?;
        if !blocking.is_empty() {
            let ids: Vec<String> = blocking.iter().map(|b| b.depends_on.to_string()).collect();
            let mut decision = SchedulingDecision::deny(
                DenialKind::DependencyUnmet,
                format!("前置任务未满足: {}", ids.join(", ")),
            )
            .with_priority(priority);
            decision.blocking_factors = blocking;
            return Ok(decision);
        }

        let shortfalls = self.resources.check_available().await?;
        if !shortfalls.is_empty() {
            let mut decision = SchedulingDecision::deny(
                DenialKind::ResourceInsufficient,
                describe_shortfalls(&shortfalls),
            )
            .with_priority(priority);
            decision.resource_shortfalls = shortfalls;
            return Ok(decision);
        }

        if !commit {
            return Ok(SchedulingDecision::approve("满足调度条件").with_priority(priority));
        }

        let acquired = self
            .cache
            .set_nx_ex(&lock_key(task_id), &self.instance_id, self.lock_ttl)
            .await?;
        if !acquired {
            debug!(task_id, "调度锁已被其他调度器持有");
            return Ok(SchedulingDecision::deny(
                DenialKind::LockContention,
                "其他调度器正在处理该任务",
            )
            .with_priority(priority));
        }

        let reservation = match self.resources.reserve_resources(task_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.release_lock(task_id).await;
                return Err(e);
            }
        };

        match reservation {
            ReservationOutcome::Reserved(allocation) => {
                let mut decision =
                    SchedulingDecision::approve("准入通过，已获取调度锁并预留资源")
                        .with_priority(priority);
                decision.resource_allocation = Some(allocation);
                Ok(decision)
            }
            ReservationOutcome::Insufficient(shortfalls) => {
                self.release_lock(task_id).await;
                let mut decision = SchedulingDecision::deny(
                    DenialKind::ResourceInsufficient,
                    describe_shortfalls(&shortfalls),
                )
                .with_priority(priority);
                decision.resource_shortfalls = shortfalls;
                Ok(decision)
            }
        }
    }

    /// 释放本实例持有的调度锁
    pub async fn release_lock(&self, task_id: i64) {
        if let Err(e) = self
            .cache
            .delete_if_equals(&lock_key(task_id), &self.instance_id)
            .await
        {
            warn!(task_id, "释放调度锁失败: {}", e);
        }
    }

    /// 是否有任意调度器持有该任务的锁
    pub async fn is_locked(&self, task_id: i64) -> SchedulerResult<bool> {
        Ok(self.cache.get(&lock_key(task_id)).await?.is_some())
    }

    /// 计算优先级，负载和历史抓取量读取失败时按 0 处理
    pub async fn calculate_priority(&self, task: &Task, now: DateTime<Utc>) -> PriorityAssessment {
        let system_load = match self.resources.system_load().await {
            Ok(load) => load,
            Err(e) => {
                warn!(task_id = task.id, "读取系统负载失败: {}", e);
                0.0
            }
        };
        let historical_volume = match self
            .cache
            .hget(TASK_VOLUME_KEY, &task.id.to_string())
            .await
        {
            Ok(value) => value.and_then(|v| v.parse().ok()).unwrap_or(0),
            Err(e) => {
                warn!(task_id = task.id, "读取历史抓取量失败: {}", e);
                0
            }
        };

        self.calculator.calculate(
            task,
            &PriorityContext {
                now,
                system_load,
                historical_volume,
            },
        )
    }

    /// 累加任务的历史抓取量
    pub async fn record_task_volume(&self, task_id: i64, data_count: i64) -> SchedulerResult<i64> {
        self.cache
            .hincr(TASK_VOLUME_KEY, &task_id.to_string(), data_count.max(0))
            .await
    }

    /// 入队，分数 = 优先级档位 + 越早越靠前
    pub async fn enqueue(
        &self,
        task_id: i64,
        priority: TaskPriority,
        anchor: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        self.cache
            .zadd(
                PRIORITY_QUEUE_KEY,
                &task_id.to_string(),
                queue_score(priority, anchor),
            )
            .await
    }

    /// 弹出优先级最高的 `count` 个任务
    pub async fn dequeue_batch(&self, count: usize) -> SchedulerResult<Vec<i64>> {
        Ok(self
            .cache
            .zpop_max(PRIORITY_QUEUE_KEY, count)
            .await?
            .into_iter()
            .filter_map(|(member, _)| member.parse().ok())
            .collect())
    }

    pub async fn remove_from_queue(&self, task_id: i64) -> SchedulerResult<bool> {
        self.cache
            .zrem(PRIORITY_QUEUE_KEY, &task_id.to_string())
            .await
    }

    pub async fn queue_depth(&self) -> SchedulerResult<u64> {
        self.cache.zcard(PRIORITY_QUEUE_KEY).await
    }

    /// 调度计数快照（dispatched、skipped 等）
    pub async fn bump_scheduler_metric(&self, field: &str, delta: i64) {
        if let Err(e) = self.cache.hincr(SCHEDULER_METRICS_KEY, field, delta).await {
            debug!("更新调度计数 {} 失败: {}", field, e);
        }
    }

    pub async fn scheduler_metrics(&self) -> SchedulerResult<HashMap<String, i64>> {
        Ok(self
            .cache
            .hget_all(SCHEDULER_METRICS_KEY)
            .await?
            .into_iter()
            .filter_map(|(field, value)| value.parse().ok().map(|v| (field, v)))
            .collect())
    }
}

pub fn queue_score(priority: TaskPriority, anchor: DateTime<Utc>) -> f64 {
    priority.level() as f64 * PRIORITY_BAND + (PRIORITY_BAND - anchor.timestamp() as f64)
}

fn describe_shortfalls(shortfalls: &[ResourceShortfall]) -> String {
    let parts: Vec<String> = shortfalls
        .iter()
        .map(|s| format!("{} 需要 {} 剩余 {}", s.resource, s.requested, s.available))
        .collect();
    format!("资源不足: {}", parts.join("; "))
}
