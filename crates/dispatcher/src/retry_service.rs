use std::sync::Arc;

use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    ExecutionPhase, PhaseRecord, StateTransitionRecord, Task, TaskStatus, TaskUpdate,
};
use orchestrator_core::traits::TaskRepository;
use orchestrator_core::SchedulerResult;
use orchestrator_domain::{ensure_transition, FailedTaskDecision, RetryPolicy, TimeoutDecision};
use orchestrator_infrastructure::MetricsCollector;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::resource_manager::ResourceManager;
use crate::state_tracker::StateTracker;

/// 单个任务的恢复动作
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum RecoveryAction {
    /// 重新排队等待调度
    Requeued { retry_count: i32 },
    /// 超时且重试耗尽，置为 TIMEOUT 并禁用
    TimedOut,
    /// 退避时间未到
    Waiting { remaining_secs: i64 },
    /// 重试耗尽，保持 FAILED 等待人工重置
    Exhausted,
    /// 条件更新失败，任务已被其他组件修改
    LostRace,
}

impl RecoveryAction {
    pub fn is_action(&self) -> bool {
        matches!(
            self,
            RecoveryAction::Requeued { .. } | RecoveryAction::TimedOut
        )
    }
}

/// 重试管理：超时回收与失败重试的具体执行
pub struct RetryManager {
    task_repo: Arc<dyn TaskRepository>,
    resources: Arc<ResourceManager>,
    tracker: Arc<StateTracker>,
    metrics: Arc<MetricsCollector>,
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        resources: Arc<ResourceManager>,
        tracker: Arc<StateTracker>,
        metrics: Arc<MetricsCollector>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            task_repo,
            resources,
            tracker,
            metrics,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 处理运行超时的任务
    ///
    /// 还有重试次数时重新排队并推迟 `timeout_requeue_delay`，否则置为 TIMEOUT 并禁用。
    /// 两种情况都会释放任务持有的资源。
    pub async fn handle_timeout(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> SchedulerResult<RecoveryAction> {
        let timeout_minutes = self.policy.running_timeout.num_minutes();

        let (new_status, fields, action, reason) = match self.policy.decide_timeout(task, now) {
            TimeoutDecision::Requeue {
                next_run_at,
                retry_count,
            } => {
                let message = self.timeout_message(task, now, retry_count).await;
                (
                    TaskStatus::Pending,
                    TaskUpdate::new()
                        .retry_count(retry_count)
                        .next_run_at(Some(next_run_at))
                        .error_message(Some(message.clone())),
                    RecoveryAction::Requeued { retry_count },
                    message,
                )
            }
            TimeoutDecision::Exhausted => {
                let message = format!(
                    "运行超过 {timeout_minutes} 分钟未完成，重试次数已耗尽（{}/{}）",
                    task.retry_count, task.max_retries
                );
                (
                    TaskStatus::Timeout,
                    TaskUpdate::new()
                        .enabled(false)
                        .error_message(Some(message.clone())),
                    RecoveryAction::TimedOut,
                    message,
                )
            }
        };

        ensure_transition(TaskStatus::Running, new_status)?;
        let affected = self
            .task_repo
            .conditional_transition(
                task.id,
                TaskStatus::Running,
                Some(task.updated_at),
                new_status,
                &fields,
            )
            .await?;
        if affected == 0 {
            debug!(task_id = task.id, "超时回收时任务已被修改，跳过");
            return Ok(RecoveryAction::LostRace);
        }

        if let Err(e) = self.resources.release_resources(task.id).await {
            warn!(task_id = task.id, "超时回收释放资源失败: {}", e);
        }
        self.tracker.record_transition(StateTransitionRecord::new(
            task.id,
            Some(TaskStatus::Running),
            new_status,
            reason.clone(),
        ));
        self.tracker.record_phase(PhaseRecord::new(
            task.id,
            ExecutionPhase::Reclamation,
            Some(reason),
        ));
        self.metrics.record_timeout();

        match &action {
            RecoveryAction::Requeued { retry_count } => {
                info!(task_id = task.id, "超时任务重新排队，第 {} 次重试", retry_count)
            }
            _ => warn!(task_id = task.id, "任务超时且重试次数耗尽，已禁用"),
        }
        Ok(action)
    }

    async fn timeout_message(&self, task: &Task, now: DateTime<Utc>, retry_count: i32) -> String {
        let timeout_minutes = self.policy.running_timeout.num_minutes();
        match self.tracker.predict_completion(task.id, now).await {
            Ok(prediction) if prediction.sample_size > 0 => format!(
                "运行超过 {timeout_minutes} 分钟未完成（历史平均耗时 {:.0} 秒），第 {retry_count} 次重试",
                prediction.mean_duration_secs
            ),
            _ => format!("运行超过 {timeout_minutes} 分钟未完成，第 {retry_count} 次重试"),
        }
    }

    /// 处理失败任务：退避时间已过则重新排队
    pub async fn handle_failed(
        &self,
        task: &Task,
        now: DateTime<Utc>,
    ) -> SchedulerResult<RecoveryAction> {
        match self.policy.decide_failed(task, now) {
            FailedTaskDecision::Exhausted => Ok(RecoveryAction::Exhausted),
            FailedTaskDecision::WaitBackoff { remaining } => {
                debug!(
                    task_id = task.id,
                    "退避时间未到，还需等待 {} 秒",
                    remaining.num_seconds()
                );
                Ok(RecoveryAction::Waiting {
                    remaining_secs: remaining.num_seconds(),
                })
            }
            FailedTaskDecision::Requeue { retry_count } => {
                ensure_transition(TaskStatus::Failed, TaskStatus::Pending)?;
                let fields = TaskUpdate::new()
                    .retry_count(retry_count)
                    .next_run_at(Some(now));
                let affected = self
                    .task_repo
                    .conditional_transition(
                        task.id,
                        TaskStatus::Failed,
                        Some(task.updated_at),
                        TaskStatus::Pending,
                        &fields,
                    )
                    .await?;
                if affected == 0 {
                    return Ok(RecoveryAction::LostRace);
                }

                let backoff = self.policy.backoff(task.retry_count);
                let reason = format!(
                    "退避 {} 分钟后重试，第 {retry_count} 次",
                    backoff.num_minutes()
                );
                self.tracker.record_transition(StateTransitionRecord::new(
                    task.id,
                    Some(TaskStatus::Failed),
                    TaskStatus::Pending,
                    reason.clone(),
                ));
                self.tracker.record_phase(PhaseRecord::new(
                    task.id,
                    ExecutionPhase::Retry,
                    Some(reason),
                ));
                self.metrics.record_retry();
                info!(task_id = task.id, "失败任务重新排队，第 {} 次重试", retry_count);
                Ok(RecoveryAction::Requeued { retry_count })
            }
        }
    }
}
