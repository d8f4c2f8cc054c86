use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::models::{
    ExecutionPhase, PhaseRecord, StateTransitionRecord, SubTaskResultMessage, Task, TaskStatus,
    TaskUpdate,
};
use orchestrator_core::traits::{MessageQueue, TaskRepository};
use orchestrator_core::time_utils::checked_after;
use orchestrator_core::SchedulerResult;
use orchestrator_domain::{ensure_transition, WindowPolicy};
use orchestrator_infrastructure::MetricsCollector;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::consumer::{listen_queue, QueueConsumer};
use crate::priority_manager::PriorityManager;
use crate::resource_manager::ResourceManager;
use crate::state_tracker::StateTracker;

#[derive(Debug, Clone, PartialEq)]
pub enum ResultOutcome {
    /// 任务离开 RUNNING 进入该状态
    Applied(TaskStatus),
    /// 过期或重复的结果，直接确认
    Ignored(String),
}

/// Worker 结果监听
///
/// 子任务结果把父任务带出 RUNNING：成功推进高水位回到 PENDING，失败置为 FAILED
/// 交给巡检重试。两种情况都会释放资源并记录状态迁移。
pub struct ResultListener {
    task_repo: Arc<dyn TaskRepository>,
    message_queue: Arc<dyn MessageQueue>,
    resources: Arc<ResourceManager>,
    priority: Arc<PriorityManager>,
    tracker: Arc<StateTracker>,
    metrics: Arc<MetricsCollector>,
    window_policy: WindowPolicy,
    result_queue: String,
    batch_size: usize,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl ResultListener {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        message_queue: Arc<dyn MessageQueue>,
        resources: Arc<ResourceManager>,
        priority: Arc<PriorityManager>,
        tracker: Arc<StateTracker>,
        metrics: Arc<MetricsCollector>,
        window_policy: WindowPolicy,
        result_queue: String,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            task_repo,
            message_queue,
            resources,
            priority,
            tracker,
            metrics,
            window_policy,
            result_queue,
            batch_size,
            poll_interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) {
        listen_queue(self, &self.running, self.poll_interval, shutdown_rx).await;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 处理一条子任务结果
    pub async fn handle_result(
        &self,
        result: &SubTaskResultMessage,
    ) -> SchedulerResult<ResultOutcome> {
        let now = Utc::now();
        let Some(task) = self.task_repo.get_by_id(result.task_id).await? else {
            warn!(task_id = result.task_id, "收到不存在任务的结果，忽略");
            return Ok(ResultOutcome::Ignored("任务不存在".to_string()));
        };
        if task.status != TaskStatus::Running {
            debug!(
                task_id = task.id,
                "任务状态为 {}，忽略过期或重复的结果",
                task.status
            );
            return Ok(ResultOutcome::Ignored(format!(
                "任务状态为 {}，不是 RUNNING",
                task.status
            )));
        }

        let (new_status, fields, reason) = if result.success {
            self.success_update(&task, result, now)
        } else {
            self.failure_update(&task, result, now)
        };

        ensure_transition(TaskStatus::Running, new_status)?;
        let affected = self
            .task_repo
            .conditional_transition(task.id, TaskStatus::Running, None, new_status, &fields)
            .await?;
        if affected == 0 {
            return Ok(ResultOutcome::Ignored("任务状态已被其他组件修改".to_string()));
        }

        if let Err(e) = self.resources.release_resources(task.id).await {
            warn!(task_id = task.id, "释放资源失败: {}", e);
        }
        if result.success {
            if let Err(e) = self
                .priority
                .record_task_volume(task.id, result.data_count)
                .await
            {
                debug!(task_id = task.id, "记录抓取量失败: {}", e);
            }
        }
        self.tracker.record_transition(
            StateTransitionRecord::new(task.id, Some(TaskStatus::Running), new_status, reason.clone())
                .with_metadata("data_count", result.data_count)
                .with_metadata("window_end", result.window_end.to_rfc3339()),
        );
        self.tracker.record_phase(PhaseRecord::new(
            task.id,
            ExecutionPhase::Execution,
            Some(reason),
        ));
        self.metrics.record_result(result.success);

        Ok(ResultOutcome::Applied(new_status))
    }

    fn success_update(
        &self,
        task: &Task,
        result: &SubTaskResultMessage,
        now: DateTime<Utc>,
    ) -> (TaskStatus, TaskUpdate, String) {
        let latest = task
            .latest_crawl_time
            .map_or(result.window_end, |current| current.max(result.window_end));
        let no_data_count = if result.data_count > 0 {
            0
        } else {
            task.no_data_count + 1
        };

        let mut fields = TaskUpdate::new()
            .latest_crawl_time(Some(latest))
            .current_crawl_time(Some(latest))
            .progress(self.window_policy.progress_after(task, latest))
            .no_data_count(no_data_count)
            .retry_count(0)
            .error_message(None)
            .last_succeeded_at(Some(now))
            .last_completed_at(Some(now));

        match task.interval() {
            Ok(interval) if now - latest > interval => {
                debug!(task_id = task.id, "高水位 {} 仍落后，下个周期继续追赶", latest);
                fields = fields.next_run_at(Some(now));
            }
            Ok(interval) if task.next_run_at.is_none() => match checked_after(now, interval) {
                Ok(next_run_at) => fields = fields.next_run_at(Some(next_run_at)),
                Err(e) => warn!(task_id = task.id, "无法计算下次运行时间: {}", e),
            },
            Ok(_) => {}
            Err(e) => warn!(task_id = task.id, "爬取间隔无效，交由下一轮扫描处理: {}", e),
        }

        info!(
            task_id = task.id,
            "子任务成功，抓取 {} 条，高水位推进到 {}",
            result.data_count,
            latest
        );
        (
            TaskStatus::Pending,
            fields,
            format!("子任务成功，抓取 {} 条", result.data_count),
        )
    }

    fn failure_update(
        &self,
        task: &Task,
        result: &SubTaskResultMessage,
        now: DateTime<Utc>,
    ) -> (TaskStatus, TaskUpdate, String) {
        let error = result
            .error_message
            .clone()
            .unwrap_or_else(|| "Worker未提供错误信息".to_string());
        let mut fields = TaskUpdate::new()
            .error_message(Some(error.clone()))
            .last_completed_at(Some(now));
        if !task.can_retry() {
            warn!(task_id = task.id, "子任务失败且重试次数已耗尽，禁用任务");
            fields = fields.enabled(false);
        } else {
            warn!(task_id = task.id, "子任务失败: {}", error);
        }
        (TaskStatus::Failed, fields, format!("子任务失败: {error}"))
    }
}

#[async_trait]
impl QueueConsumer for ResultListener {
    fn queue_name(&self) -> &str {
        &self.result_queue
    }

    async fn process_batch(&self) -> SchedulerResult<usize> {
        let messages = self
            .message_queue
            .consume_messages(&self.result_queue, self.batch_size)
            .await?;

        for message in &messages {
            let acked = match message.decode::<SubTaskResultMessage>() {
                Err(e) => {
                    warn!("结果消息格式错误，转入死信: {}", e);
                    self.message_queue.nack_message(message, false).await
                }
                Ok(result) => match self.handle_result(&result).await {
                    Ok(_) => self.message_queue.ack_message(message).await,
                    Err(e) if e.is_transient() => {
                        warn!(task_id = result.task_id, "处理结果时基础设施不可用，重新入队: {}", e);
                        self.message_queue.nack_message(message, true).await
                    }
                    Err(e) => {
                        warn!(task_id = result.task_id, "结果无法处理，转入死信: {}", e);
                        self.message_queue.nack_message(message, false).await
                    }
                },
            };
            if let Err(e) = acked {
                warn!("确认结果消息 {} 失败: {}", message.id, e);
            }
        }
        Ok(messages.len())
    }
}
