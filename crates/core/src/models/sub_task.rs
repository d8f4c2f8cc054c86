use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};

/// 下发给外部爬虫 Worker 的子任务
///
/// 线上协议为 camelCase JSON，时间窗口精确到分钟且 `start < end`。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskMessage {
    pub task_id: i64,
    pub keyword: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub is_initial_crawl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weibo_account_id: Option<i64>,
    pub enable_account_rotation: bool,
}

impl SubTaskMessage {
    pub fn validate(&self) -> SchedulerResult<()> {
        if self.start >= self.end {
            return Err(SchedulerError::InvalidWindow(format!(
                "任务 {} 的窗口起点 {} 不早于终点 {}",
                self.task_id, self.start, self.end
            )));
        }
        for boundary in [self.start, self.end] {
            if boundary.second() != 0 || boundary.nanosecond() != 0 {
                return Err(SchedulerError::InvalidWindow(format!(
                    "任务 {} 的窗口边界 {} 未对齐到分钟",
                    self.task_id, boundary
                )));
            }
        }
        Ok(())
    }
}

/// Worker 回传的子任务执行结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubTaskResultMessage {
    pub task_id: i64,
    pub success: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    #[serde(default)]
    pub data_count: i64,
    #[serde(default)]
    pub is_initial_crawl: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
