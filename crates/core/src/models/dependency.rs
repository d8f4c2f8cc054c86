use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::SchedulerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyType {
    FinishToStart,
    StartToStart,
    SuccessToStart,
    DataDependency,
    ResourceDependency,
}

impl DependencyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyType::FinishToStart => "finish-to-start",
            DependencyType::StartToStart => "start-to-start",
            DependencyType::SuccessToStart => "success-to-start",
            DependencyType::DataDependency => "data-dependency",
            DependencyType::ResourceDependency => "resource-dependency",
        }
    }
}

impl fmt::Display for DependencyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DependencyType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "finish-to-start" => Ok(DependencyType::FinishToStart),
            "start-to-start" => Ok(DependencyType::StartToStart),
            "success-to-start" => Ok(DependencyType::SuccessToStart),
            "data-dependency" => Ok(DependencyType::DataDependency),
            "resource-dependency" => Ok(DependencyType::ResourceDependency),
            _ => Err(SchedulerError::InvalidDependency(format!(
                "未知的依赖类型: {s}"
            ))),
        }
    }
}

/// 有向依赖边：`task_id` 依赖 `depends_on`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEdge {
    pub task_id: i64,
    pub depends_on: i64,
    pub dependency_type: DependencyType,
    /// 等待上限（秒），超过后视 `auto_resolve` 决定是否放行
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_seconds: Option<i64>,
    #[serde(default)]
    pub auto_resolve: bool,
    pub created_at: DateTime<Utc>,
}

impl DependencyEdge {
    pub fn new(task_id: i64, depends_on: i64, dependency_type: DependencyType) -> Self {
        Self {
            task_id,
            depends_on,
            dependency_type,
            max_wait_seconds: None,
            auto_resolve: false,
            created_at: Utc::now(),
        }
    }

    pub fn with_max_wait(mut self, seconds: i64, auto_resolve: bool) -> Self {
        self.max_wait_seconds = Some(seconds);
        self.auto_resolve = auto_resolve;
        self
    }

    /// 等待超时且允许自动放行
    pub fn is_wait_expired(&self, now: DateTime<Utc>) -> bool {
        match self.max_wait_seconds {
            Some(seconds) if self.auto_resolve => {
                now - self.created_at >= chrono::Duration::seconds(seconds)
            }
            _ => false,
        }
    }
}

/// 依赖检查结果中未满足的前置任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlockingDependency {
    pub depends_on: i64,
    pub dependency_type: DependencyType,
    pub reason: String,
}
