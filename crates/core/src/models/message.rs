use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::sub_task::{SubTaskMessage, SubTaskResultMessage};
use crate::errors::{SchedulerError, SchedulerResult};

/// 死信头部：原始队列
pub const HEADER_ORIGINAL_QUEUE: &str = "x-original-queue";
/// 死信头部：失败次数
pub const HEADER_DEATH_COUNT: &str = "x-death-count";
/// 死信头部：最后一次错误
pub const HEADER_LAST_ERROR: &str = "x-last-error";

/// 队列消息信封
///
/// 消息体只承载 `payload`，其余字段映射到 AMQP 属性和头部。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub retry_count: i32,
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 消费时由队列实现填充，用于 ack/nack
    #[serde(skip)]
    pub delivery_tag: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    CrawlSubTask,
    SubTaskResult,
    Unknown,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::CrawlSubTask => "crawl_sub_task",
            MessageType::SubTaskResult => "sub_task_result",
            MessageType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "crawl_sub_task" => MessageType::CrawlSubTask,
            "sub_task_result" => MessageType::SubTaskResult,
            _ => MessageType::Unknown,
        }
    }
}

impl Message {
    pub fn new(message_type: MessageType, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            payload,
            timestamp: Utc::now(),
            retry_count: 0,
            correlation_id: None,
            headers: HashMap::new(),
            delivery_tag: None,
        }
    }

    pub fn sub_task(message: &SubTaskMessage) -> SchedulerResult<Self> {
        let payload = serde_json::to_value(message)?;
        Ok(Self::new(MessageType::CrawlSubTask, payload)
            .with_correlation_id(format!("task-{}", message.task_id)))
    }

    pub fn sub_task_result(message: &SubTaskResultMessage) -> SchedulerResult<Self> {
        let payload = serde_json::to_value(message)?;
        Ok(Self::new(MessageType::SubTaskResult, payload)
            .with_correlation_id(format!("task-{}", message.task_id)))
    }

    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_header(mut self, key: &str, value: impl ToString) -> Self {
        self.headers.insert(key.to_string(), value.to_string());
        self
    }

    pub fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> SchedulerResult<T> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            SchedulerError::Serialization(format!("消息 {} 解析失败: {}", self.id, e))
        })
    }

    pub fn message_type_str(&self) -> &'static str {
        self.message_type.as_str()
    }
}
