use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::models::message::{
    HEADER_DEATH_COUNT, HEADER_LAST_ERROR, HEADER_ORIGINAL_QUEUE,
};
use orchestrator_core::models::{Message, NewFailedTask};
use orchestrator_core::traits::{FailedTaskRepository, MessageQueue};
use orchestrator_core::SchedulerResult;
use orchestrator_infrastructure::MetricsCollector;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

use crate::consumer::{listen_queue, QueueConsumer};

/// 死信消费者
///
/// 把死信队列里的每条消息落库为待人工排查的失败记录。
/// 落库成功才确认，落库失败重新入队，死信不会丢失。
pub struct DeadLetterConsumer {
    failed_task_repo: Arc<dyn FailedTaskRepository>,
    message_queue: Arc<dyn MessageQueue>,
    metrics: Arc<MetricsCollector>,
    dead_letter_queue: String,
    batch_size: usize,
    poll_interval: Duration,
    running: Arc<RwLock<bool>>,
}

impl DeadLetterConsumer {
    pub fn new(
        failed_task_repo: Arc<dyn FailedTaskRepository>,
        message_queue: Arc<dyn MessageQueue>,
        metrics: Arc<MetricsCollector>,
        dead_letter_queue: String,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            failed_task_repo,
            message_queue,
            metrics,
            dead_letter_queue,
            batch_size,
            poll_interval,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) {
        listen_queue(self, &self.running, self.poll_interval, shutdown_rx).await;
    }

    async fn persist(&self, message: &Message) -> SchedulerResult<()> {
        let record = failed_task_from(message);
        let saved = self.failed_task_repo.create(&record).await?;
        self.metrics.record_dead_letter();
        info!(
            "死信已落库: id={}, 消息={}, 原始队列={}, 失败次数={}",
            saved.id, saved.message_id, saved.original_queue, saved.failure_count
        );
        Ok(())
    }
}

/// 从死信头部提取原始队列、失败次数和最后一次错误
pub fn failed_task_from(message: &Message) -> NewFailedTask {
    let failure_count = message
        .header(HEADER_DEATH_COUNT)
        .and_then(|count| count.trim().parse::<i32>().ok())
        .unwrap_or(1)
        .max(1);

    NewFailedTask {
        message_id: message.id.clone(),
        original_queue: message
            .header(HEADER_ORIGINAL_QUEUE)
            .filter(|queue| !queue.is_empty())
            .unwrap_or("unknown")
            .to_string(),
        failure_count,
        last_error: message.header(HEADER_LAST_ERROR).map(str::to_string),
        payload: message.payload.clone(),
    }
}

#[async_trait]
impl QueueConsumer for DeadLetterConsumer {
    fn queue_name(&self) -> &str {
        &self.dead_letter_queue
    }

    async fn process_batch(&self) -> SchedulerResult<usize> {
        let messages = self
            .message_queue
            .consume_messages(&self.dead_letter_queue, self.batch_size)
            .await?;

        for message in &messages {
            let acked = match self.persist(message).await {
                Ok(()) => self.message_queue.ack_message(message).await,
                Err(e) => {
                    error!("死信 {} 落库失败，重新入队: {}", message.id, e);
                    self.message_queue.nack_message(message, true).await
                }
            };
            if let Err(e) = acked {
                warn!("确认死信 {} 失败: {}", message.id, e);
            }
        }
        Ok(messages.len())
    }
}
