use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use orchestrator_core::{
    models::message::{HEADER_DEATH_COUNT, HEADER_LAST_ERROR, HEADER_ORIGINAL_QUEUE},
    models::Message,
    traits::MessageQueue,
    SchedulerError, SchedulerResult,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// 内存消息队列实现
///
/// 适用于嵌入式部署和测试。拉取的消息在确认前保存在待确认表中，
/// `nack(requeue = false)` 会把消息连同死信头部转入死信队列，行为与 broker 一致。
pub struct InMemoryMessageQueue {
    queues: RwLock<HashMap<String, VecDeque<Message>>>,
    unacked: Mutex<HashMap<u64, (String, Message)>>,
    next_delivery_tag: AtomicU64,
    dead_letter_queue: String,
}

impl InMemoryMessageQueue {
    pub fn new(dead_letter_queue: impl Into<String>) -> Self {
        let dead_letter_queue = dead_letter_queue.into();
        info!(dead_letter_queue = %dead_letter_queue, "创建内存消息队列");
        Self {
            queues: RwLock::new(HashMap::new()),
            unacked: Mutex::new(HashMap::new()),
            next_delivery_tag: AtomicU64::new(1),
            dead_letter_queue,
        }
    }

    pub async fn unacked_count(&self) -> usize {
        self.unacked.lock().await.len()
    }

    async fn take_unacked(&self, message: &Message) -> SchedulerResult<Option<(String, Message)>> {
        let Some(tag) = message.delivery_tag else {
            return Err(SchedulerError::MessageQueue(format!(
                "消息 {} 缺少 delivery_tag",
                message.id
            )));
        };
        let entry = self.unacked.lock().await.remove(&tag);
        if entry.is_none() {
            warn!(message_id = %message.id, delivery_tag = tag, "未知的 delivery_tag，可能已被确认");
        }
        Ok(entry)
    }

    fn dead_lettered(queue: &str, mut message: Message) -> Message {
        let count = message
            .header(HEADER_DEATH_COUNT)
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(0)
            + 1;
        message
            .headers
            .entry(HEADER_ORIGINAL_QUEUE.to_string())
            .or_insert_with(|| queue.to_string());
        message
            .headers
            .insert(HEADER_DEATH_COUNT.to_string(), count.to_string());
        message
            .headers
            .entry(HEADER_LAST_ERROR.to_string())
            .or_insert_with(|| "rejected".to_string());
        message.delivery_tag = None;
        message
    }
}

#[async_trait]
impl MessageQueue for InMemoryMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> SchedulerResult<bool> {
        let mut message = message.clone();
        message.delivery_tag = None;

        let mut queues = self.queues.write().await;
        queues.entry(queue.to_string()).or_default().push_back(message);
        debug!(queue, "消息已写入内存队列");
        Ok(true)
    }

    async fn consume_messages(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> SchedulerResult<Vec<Message>> {
        let mut queues = self.queues.write().await;
        let Some(pending) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut unacked = self.unacked.lock().await;
        let mut messages = Vec::new();
        while messages.len() < max_messages {
            let Some(mut message) = pending.pop_front() else {
                break;
            };
            let tag = self.next_delivery_tag.fetch_add(1, Ordering::Relaxed);
            message.delivery_tag = Some(tag);
            unacked.insert(tag, (queue.to_string(), message.clone()));
            messages.push(message);
        }
        Ok(messages)
    }

    async fn ack_message(&self, message: &Message) -> SchedulerResult<()> {
        self.take_unacked(message).await?;
        Ok(())
    }

    async fn nack_message(&self, message: &Message, requeue: bool) -> SchedulerResult<()> {
        let Some((queue, original)) = self.take_unacked(message).await? else {
            return Ok(());
        };

        let mut queues = self.queues.write().await;
        if requeue {
            let mut original = original;
            original.delivery_tag = None;
            queues.entry(queue).or_default().push_front(original);
        } else {
            let dead = Self::dead_lettered(&queue, original);
            queues
                .entry(self.dead_letter_queue.clone())
                .or_default()
                .push_back(dead);
            debug!(queue = %queue, message_id = %message.id, "消息已转入死信队列");
        }
        Ok(())
    }

    async fn create_queue(&self, queue: &str, _durable: bool) -> SchedulerResult<()> {
        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let queues = self.queues.read().await;
        Ok(queues.get(queue).map_or(0, |q| q.len() as u32))
    }
}
