use async_trait::async_trait;

use crate::{models::Message, SchedulerResult};

/// 消息队列抽象接口
///
/// 至少一次投递，手动确认；`nack(requeue = false)` 由实现路由到死信队列。
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// 发布消息到指定队列，返回 broker 是否确认
    async fn publish_message(&self, queue: &str, message: &Message) -> SchedulerResult<bool>;

    /// 从指定队列拉取至多 `max_messages` 条消息
    async fn consume_messages(&self, queue: &str, max_messages: usize)
        -> SchedulerResult<Vec<Message>>;

    /// 确认消息处理完成
    async fn ack_message(&self, message: &Message) -> SchedulerResult<()>;

    /// 拒绝消息，`requeue = false` 时进入死信
    async fn nack_message(&self, message: &Message, requeue: bool) -> SchedulerResult<()>;

    /// 创建队列
    async fn create_queue(&self, queue: &str, durable: bool) -> SchedulerResult<()>;

    /// 获取队列中的消息数量
    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32>;
}
