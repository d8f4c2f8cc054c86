use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailedTaskStatus {
    PendingReview,
    Reviewed,
    Discarded,
}

impl FailedTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailedTaskStatus::PendingReview => "pending_review",
            FailedTaskStatus::Reviewed => "reviewed",
            FailedTaskStatus::Discarded => "discarded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_review" => Some(FailedTaskStatus::PendingReview),
            "reviewed" => Some(FailedTaskStatus::Reviewed),
            "discarded" => Some(FailedTaskStatus::Discarded),
            _ => None,
        }
    }
}

impl fmt::Display for FailedTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 死信记录，等待人工排查
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailedTask {
    pub id: i64,
    pub message_id: String,
    pub original_queue: String,
    pub failure_count: i32,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
    pub status: FailedTaskStatus,
    pub created_at: DateTime<Utc>,
}

/// 尚未持久化的死信记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewFailedTask {
    pub message_id: String,
    pub original_queue: String,
    pub failure_count: i32,
    pub last_error: Option<String>,
    pub payload: serde_json::Value,
}
