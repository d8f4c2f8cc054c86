use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskStatus;

/// 一次任务状态迁移，追加写入且按保留期清理
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateTransitionRecord {
    pub id: String,
    pub task_id: i64,
    pub from_state: Option<TaskStatus>,
    pub to_state: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StateTransitionRecord {
    pub fn new(
        task_id: i64,
        from_state: Option<TaskStatus>,
        to_state: TaskStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            from_state,
            to_state,
            timestamp: Utc::now(),
            reason: reason.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl ToString) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// 准入控制（优先级、依赖、资源、锁）
    Admission,
    /// 子任务发布
    Dispatch,
    /// Worker 执行中
    Execution,
    /// 超时回收
    Reclamation,
    /// 失败重试
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseRecord {
    pub id: String,
    pub task_id: i64,
    pub phase: ExecutionPhase,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PhaseRecord {
    pub fn new(task_id: i64, phase: ExecutionPhase, detail: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id,
            phase,
            timestamp: Utc::now(),
            detail,
        }
    }
}

/// 状态迁移模式分析结果
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransitionPatterns {
    pub total_transitions: usize,
    /// "FROM->TO" 出现次数
    pub transition_frequency: HashMap<String, usize>,
    /// 各状态平均停留时长（秒）
    pub average_state_duration_secs: HashMap<String, f64>,
    /// 反复出现的失败迁移，按次数降序
    pub recurring_failures: Vec<RecurringFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecurringFailure {
    pub from_state: String,
    pub to_state: String,
    pub occurrences: usize,
}

/// 完成时间预测
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPrediction {
    pub task_id: i64,
    pub sample_size: usize,
    pub mean_duration_secs: f64,
    pub std_dev_secs: f64,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub recent_failure_rate: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_completion_at: Option<DateTime<Utc>>,
}
