use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use lapin::{
    options::*,
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
};
use orchestrator_core::{
    config::MessageQueueConfig,
    models::message::{HEADER_DEATH_COUNT, HEADER_LAST_ERROR, HEADER_ORIGINAL_QUEUE},
    models::{Message, MessageType},
    traits::MessageQueue,
    SchedulerError, SchedulerResult,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// RabbitMQ消息队列实现
///
/// 消息体只包含业务负载（worker 的线上格式），消息元数据放在 AMQP 属性和头部中。
/// 工作队列声明了死信交换机和消息 TTL，`nack(requeue = false)` 与过期消息都会进入死信队列。
pub struct RabbitMQMessageQueue {
    connection: Connection,
    channel: Arc<Mutex<Channel>>,
    config: MessageQueueConfig,
}

impl RabbitMQMessageQueue {
    pub async fn new(config: MessageQueueConfig) -> SchedulerResult<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("连接RabbitMQ失败: {e}")))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("创建通道失败: {e}")))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("开启发布确认失败: {e}")))?;

        info!("成功连接到RabbitMQ");

        let queue = Self {
            connection,
            channel: Arc::new(Mutex::new(channel)),
            config,
        };
        queue.initialize_topology().await?;
        Ok(queue)
    }

    /// 声明死信交换机、死信队列和两个工作队列
    async fn initialize_topology(&self) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;

        channel
            .exchange_declare(
                &self.config.dead_letter_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!(
                    "声明死信交换机 {} 失败: {e}",
                    self.config.dead_letter_exchange
                ))
            })?;

        Self::declare_queue(&channel, &self.config.dead_letter_queue, true, FieldTable::default())
            .await?;

        channel
            .queue_bind(
                &self.config.dead_letter_queue,
                &self.config.dead_letter_exchange,
                "",
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("绑定死信队列失败: {e}")))?;

        for queue in [&self.config.sub_task_queue, &self.config.result_queue] {
            Self::declare_queue(&channel, queue, true, self.work_queue_arguments()).await?;
        }

        info!(
            sub_task_queue = %self.config.sub_task_queue,
            result_queue = %self.config.result_queue,
            dead_letter_queue = %self.config.dead_letter_queue,
            "队列拓扑初始化完成"
        );
        Ok(())
    }

    fn work_queue_arguments(&self) -> FieldTable {
        let mut arguments = FieldTable::default();
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from(self.config.dead_letter_exchange.clone())),
        );
        let ttl_ms = self.config.message_ttl_seconds.saturating_mul(1000);
        arguments.insert(
            ShortString::from("x-message-ttl"),
            AMQPValue::LongLongInt(i64::try_from(ttl_ms).unwrap_or(i64::MAX)),
        );
        arguments
    }

    async fn declare_queue(
        channel: &Channel,
        queue_name: &str,
        durable: bool,
        arguments: FieldTable,
    ) -> SchedulerResult<()> {
        channel
            .queue_declare(
                queue_name,
                QueueDeclareOptions {
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    ..Default::default()
                },
                arguments,
            )
            .await
            .map_err(|e| {
                SchedulerError::MessageQueue(format!("声明队列 {queue_name} 失败: {e}"))
            })?;

        debug!("队列 {} 声明成功", queue_name);
        Ok(())
    }

    fn properties_for(message: &Message) -> BasicProperties {
        let mut headers = FieldTable::default();
        for (key, value) in &message.headers {
            headers.insert(
                ShortString::from(key.clone()),
                AMQPValue::LongString(LongString::from(value.clone())),
            );
        }
        headers.insert(
            ShortString::from("x-retry-count"),
            AMQPValue::LongInt(message.retry_count),
        );

        let mut properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type(ShortString::from("application/json"))
            .with_message_id(ShortString::from(message.id.clone()))
            .with_type(ShortString::from(message.message_type_str()))
            .with_timestamp(message.timestamp.timestamp().max(0) as u64)
            .with_headers(headers);
        if let Some(correlation_id) = &message.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.clone()));
        }
        properties
    }

    /// 从投递中还原消息信封
    ///
    /// 非 JSON 消息体以字符串形式保留在 `payload` 中，由消费者决定是否拒绝。
    fn message_from_delivery(
        data: &[u8],
        properties: &BasicProperties,
        delivery_tag: u64,
    ) -> Message {
        let payload = serde_json::from_slice(data).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(data).into_owned())
        });
        let message_type = properties
            .kind()
            .as_ref()
            .map(|kind| MessageType::parse(kind.as_str()))
            .unwrap_or(MessageType::Unknown);

        let mut message = Message::new(message_type, payload);
        if let Some(id) = properties.message_id() {
            message.id = id.as_str().to_string();
        }
        if let Some(correlation_id) = properties.correlation_id() {
            message.correlation_id = Some(correlation_id.as_str().to_string());
        }
        if let Some(ts) = properties.timestamp() {
            if let Some(timestamp) = Utc.timestamp_opt(*ts as i64, 0).single() {
                message.timestamp = timestamp;
            }
        }
        if let Some(headers) = properties.headers() {
            message.headers = Self::decode_headers(headers);
        }
        if let Some(retry) = message.header("x-retry-count").and_then(|v| v.parse().ok()) {
            message.retry_count = retry;
        }
        message.delivery_tag = Some(delivery_tag);
        message
    }

    /// 头部转换为字符串映射；broker 写入的 `x-death` 展开为死信头部
    fn decode_headers(table: &FieldTable) -> HashMap<String, String> {
        let mut headers = HashMap::new();
        for (key, value) in table.inner() {
            if key.as_str() == "x-death" {
                if let AMQPValue::FieldArray(deaths) = value {
                    if let Some(AMQPValue::FieldTable(first)) = deaths.as_slice().first() {
                        Self::merge_death_record(first, &mut headers);
                    }
                }
                continue;
            }
            if let Some(text) = amqp_value_to_string(value) {
                headers.insert(key.as_str().to_string(), text);
            }
        }
        headers
    }

    fn merge_death_record(death: &FieldTable, headers: &mut HashMap<String, String>) {
        let field = |name: &str| {
            death
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == name)
                .and_then(|(_, value)| amqp_value_to_string(value))
        };
        if let Some(queue) = field("queue") {
            headers.entry(HEADER_ORIGINAL_QUEUE.to_string()).or_insert(queue);
        }
        if let Some(count) = field("count") {
            headers.entry(HEADER_DEATH_COUNT.to_string()).or_insert(count);
        }
        if let Some(reason) = field("reason") {
            headers.entry(HEADER_LAST_ERROR.to_string()).or_insert(reason);
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> SchedulerResult<()> {
        self.connection
            .close(200, "正常关闭")
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("关闭连接失败: {e}")))?;

        info!("RabbitMQ连接已关闭");
        Ok(())
    }
}

fn amqp_value_to_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        AMQPValue::LongLongInt(v) => Some(v.to_string()),
        AMQPValue::LongInt(v) => Some(v.to_string()),
        AMQPValue::LongUInt(v) => Some(v.to_string()),
        AMQPValue::ShortInt(v) => Some(v.to_string()),
        AMQPValue::Boolean(v) => Some(v.to_string()),
        _ => None,
    }
}

#[async_trait]
impl MessageQueue for RabbitMQMessageQueue {
    async fn publish_message(&self, queue: &str, message: &Message) -> SchedulerResult<bool> {
        let payload = serde_json::to_vec(&message.payload)
            .map_err(|e| SchedulerError::Serialization(format!("序列化消息失败: {e}")))?;
        let properties = Self::properties_for(message);
        let timeout = Duration::from_secs(self.config.publish_timeout_seconds);

        let publish = async {
            let channel = self.channel.lock().await;
            let confirm = channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    &payload,
                    properties,
                )
                .await
                .map_err(|e| {
                    SchedulerError::MessageQueue(format!("发布消息到队列 {queue} 失败: {e}"))
                })?;
            drop(channel);

            confirm
                .await
                .map_err(|e| SchedulerError::MessageQueue(format!("消息发布确认失败: {e}")))
        };

        let confirmation = tokio::time::timeout(timeout, publish)
            .await
            .map_err(|_| {
                SchedulerError::MessageQueue(format!("发布消息到队列 {queue} 超时"))
            })??;

        if confirmation.is_nack() {
            warn!(queue, message_id = %message.id, "broker 拒绝了消息");
            return Ok(false);
        }

        debug!(queue, message_id = %message.id, "消息已发布");
        Ok(true)
    }

    async fn consume_messages(
        &self,
        queue: &str,
        max_messages: usize,
    ) -> SchedulerResult<Vec<Message>> {
        let channel = self.channel.lock().await;
        let mut messages = Vec::new();

        while messages.len() < max_messages {
            let delivery = channel
                .basic_get(queue, BasicGetOptions::default())
                .await
                .map_err(|e| {
                    SchedulerError::MessageQueue(format!("从队列 {queue} 获取消息失败: {e}"))
                })?;

            match delivery {
                Some(delivery) => messages.push(Self::message_from_delivery(
                    &delivery.data,
                    &delivery.properties,
                    delivery.delivery_tag,
                )),
                None => break,
            }
        }

        if !messages.is_empty() {
            debug!(queue, count = messages.len(), "拉取到消息");
        }
        Ok(messages)
    }

    async fn ack_message(&self, message: &Message) -> SchedulerResult<()> {
        let Some(delivery_tag) = message.delivery_tag else {
            return Err(SchedulerError::MessageQueue(format!(
                "消息 {} 缺少 delivery_tag，无法确认",
                message.id
            )));
        };

        let channel = self.channel.lock().await;
        channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("确认消息失败: {e}")))?;
        Ok(())
    }

    async fn nack_message(&self, message: &Message, requeue: bool) -> SchedulerResult<()> {
        let Some(delivery_tag) = message.delivery_tag else {
            return Err(SchedulerError::MessageQueue(format!(
                "消息 {} 缺少 delivery_tag，无法拒绝",
                message.id
            )));
        };

        let channel = self.channel.lock().await;
        channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(|e| SchedulerError::MessageQueue(format!("拒绝消息失败: {e}")))?;

        debug!(message_id = %message.id, requeue, "消息已拒绝");
        Ok(())
    }

    async fn create_queue(&self, queue: &str, durable: bool) -> SchedulerResult<()> {
        let channel = self.channel.lock().await;
        Self::declare_queue(&channel, queue, durable, FieldTable::default()).await
    }

    async fn get_queue_size(&self, queue: &str) -> SchedulerResult<u32> {
        let channel = self.channel.lock().await;
        let queue_info = channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    passive: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await;

        match queue_info {
            Ok(info) => Ok(info.message_count()),
            Err(e) => {
                let error_msg = e.to_string();
                if error_msg.contains("NOT_FOUND") || error_msg.contains("404") {
                    debug!("队列 {} 不存在，返回大小为0", queue);
                    Ok(0)
                } else {
                    Err(SchedulerError::MessageQueue(format!(
                        "获取队列 {queue} 信息失败: {e}"
                    )))
                }
            }
        }
    }
}
