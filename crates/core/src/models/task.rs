use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{SchedulerError, SchedulerResult};
use crate::time_utils::parse_interval;

/// 父任务：周期性爬取的持久化定义
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: i64,
    pub keyword: String,
    /// 历史回溯的起点
    pub start_date: DateTime<Utc>,
    pub current_crawl_time: Option<DateTime<Utc>>,
    /// 已抓取数据的高水位
    pub latest_crawl_time: Option<DateTime<Utc>>,
    /// 时长字符串，例如 "1h"、"30m"、"1d"
    pub crawl_interval: String,
    pub next_run_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub enabled: bool,
    pub progress: i32,
    pub total_segments: i32,
    pub no_data_count: i32,
    pub no_data_threshold: i32,
    pub retry_count: i32,
    pub max_retries: i32,
    pub error_message: Option<String>,
    pub weibo_account_id: Option<i64>,
    pub enable_account_rotation: bool,
    /// 运维设置的重要度（0-100）
    pub priority_hint: Option<i32>,
    pub last_succeeded_at: Option<DateTime<Utc>>,
    pub last_completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "TIMEOUT")]
    Timeout,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Failed,
        TaskStatus::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
        }
    }

    /// 只有失败和超时的任务允许人工重置
    pub fn is_resettable(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Timeout)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskStatus::Pending),
            "RUNNING" => Ok(TaskStatus::Running),
            "PAUSED" => Ok(TaskStatus::Paused),
            "FAILED" => Ok(TaskStatus::Failed),
            "TIMEOUT" => Ok(TaskStatus::Timeout),
            _ => Err(SchedulerError::InvalidTaskState(format!(
                "未知的任务状态: {s}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for TaskStatus {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <&str as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for TaskStatus {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        s.parse::<TaskStatus>().map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for TaskStatus {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

/// 由爬取游标推导出的任务阶段
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CrawlPhase {
    NeedsInitialCrawl,
    BackfillInProgress,
    SteadyState,
}

impl Task {
    pub fn crawl_phase(&self) -> CrawlPhase {
        match self.current_crawl_time {
            None => CrawlPhase::NeedsInitialCrawl,
            Some(current) if current < self.start_date => CrawlPhase::BackfillInProgress,
            Some(_) => CrawlPhase::SteadyState,
        }
    }

    pub fn interval(&self) -> SchedulerResult<Duration> {
        parse_interval(&self.crawl_interval)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    pub fn no_data_exceeded(&self) -> bool {
        self.no_data_threshold > 0 && self.no_data_count >= self.no_data_threshold
    }

    /// 扫描候选：PENDING、已启用且到期
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Pending
            && self.enabled
            && self.next_run_at.map_or(true, |at| at <= now)
    }

    /// 增量爬取的起点
    pub fn crawl_cursor(&self) -> DateTime<Utc> {
        self.latest_crawl_time.unwrap_or(self.start_date)
    }

    pub fn has_completed_once(&self) -> bool {
        self.last_completed_at.is_some()
    }
}

/// 任务的部分字段更新
///
/// 外层 `Option` 表示是否修改该字段，内层 `Option` 表示可空列的新值。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub enabled: Option<bool>,
    pub next_run_at: Option<Option<DateTime<Utc>>>,
    pub current_crawl_time: Option<Option<DateTime<Utc>>>,
    pub latest_crawl_time: Option<Option<DateTime<Utc>>>,
    pub progress: Option<i32>,
    pub total_segments: Option<i32>,
    pub no_data_count: Option<i32>,
    pub retry_count: Option<i32>,
    pub error_message: Option<Option<String>>,
    pub last_succeeded_at: Option<Option<DateTime<Utc>>>,
    pub last_completed_at: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn next_run_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.next_run_at = Some(at);
        self
    }

    pub fn current_crawl_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.current_crawl_time = Some(at);
        self
    }

    pub fn latest_crawl_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.latest_crawl_time = Some(at);
        self
    }

    pub fn progress(mut self, progress: i32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn total_segments(mut self, total: i32) -> Self {
        self.total_segments = Some(total);
        self
    }

    pub fn no_data_count(mut self, count: i32) -> Self {
        self.no_data_count = Some(count);
        self
    }

    pub fn retry_count(mut self, count: i32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn error_message(mut self, message: Option<String>) -> Self {
        self.error_message = Some(message);
        self
    }

    pub fn last_succeeded_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_succeeded_at = Some(at);
        self
    }

    pub fn last_completed_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_completed_at = Some(at);
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// 把更新应用到内存中的任务上，内存实现和测试替身共用
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(enabled) = self.enabled {
            task.enabled = enabled;
        }
        if let Some(at) = self.next_run_at {
            task.next_run_at = at;
        }
        if let Some(at) = self.current_crawl_time {
            task.current_crawl_time = at;
        }
        if let Some(at) = self.latest_crawl_time {
            task.latest_crawl_time = at;
        }
        if let Some(progress) = self.progress {
            task.progress = progress;
        }
        if let Some(total) = self.total_segments {
            task.total_segments = total;
        }
        if let Some(count) = self.no_data_count {
            task.no_data_count = count;
        }
        if let Some(count) = self.retry_count {
            task.retry_count = count;
        }
        if let Some(message) = &self.error_message {
            task.error_message = message.clone();
        }
        if let Some(at) = self.last_succeeded_at {
            task.last_succeeded_at = at;
        }
        if let Some(at) = self.last_completed_at {
            task.last_completed_at = at;
        }
    }
}

/// 任务查询/计数条件
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub statuses: Option<Vec<TaskStatus>>,
    pub enabled: Option<bool>,
    pub updated_before: Option<DateTime<Utc>>,
    /// retry_count < max_retries
    pub retryable_only: bool,
    /// no_data_count >= no_data_threshold
    pub no_data_exceeded: bool,
    pub limit: Option<i64>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<TaskStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn updated_before(mut self, at: DateTime<Utc>) -> Self {
        self.updated_before = Some(at);
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable_only = true;
        self
    }

    pub fn no_data_exceeded(mut self) -> Self {
        self.no_data_exceeded = true;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if let Some(enabled) = self.enabled {
            if task.enabled != enabled {
                return false;
            }
        }
        if let Some(before) = self.updated_before {
            if task.updated_at >= before {
                return false;
            }
        }
        if self.retryable_only && !task.can_retry() {
            return false;
        }
        if self.no_data_exceeded && !task.no_data_exceeded() {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_task() -> Task {
        let now = Utc::now();
        Task {
            id: 1,
            keyword: "新能源".to_string(),
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            current_crawl_time: None,
            latest_crawl_time: None,
            crawl_interval: "1h".to_string(),
            next_run_at: None,
            status: TaskStatus::Pending,
            enabled: true,
            progress: 0,
            total_segments: 0,
            no_data_count: 0,
            no_data_threshold: 3,
            retry_count: 0,
            max_retries: 3,
            error_message: None,
            weibo_account_id: None,
            enable_account_rotation: true,
            priority_hint: None,
            last_succeeded_at: None,
            last_completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_crawl_phase_derivation() {
        let mut task = sample_task();
        assert_eq!(task.crawl_phase(), CrawlPhase::NeedsInitialCrawl);

        task.current_crawl_time = Some(task.start_date - Duration::days(1));
        assert_eq!(task.crawl_phase(), CrawlPhase::BackfillInProgress);

        task.current_crawl_time = Some(task.start_date + Duration::days(3));
        assert_eq!(task.crawl_phase(), CrawlPhase::SteadyState);
    }

    #[test]
    fn test_status_round_trip_through_str() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_status_serde_uses_upper_case() {
        let json = serde_json::to_string(&TaskStatus::Timeout).unwrap();
        assert_eq!(json, "\"TIMEOUT\"");
    }

    #[test]
    fn test_disabled_task_is_never_due() {
        let mut task = sample_task();
        let now = Utc::now();
        assert!(task.is_due(now));

        task.next_run_at = Some(now + Duration::minutes(5));
        assert!(!task.is_due(now));

        task.next_run_at = Some(now - Duration::minutes(5));
        task.enabled = false;
        assert!(!task.is_due(now));
    }

    #[test]
    fn test_only_pending_tasks_are_due() {
        let now = Utc::now();
        for status in [
            TaskStatus::Running,
            TaskStatus::Failed,
            TaskStatus::Timeout,
            TaskStatus::Paused,
        ] {
            let mut task = sample_task();
            task.status = status;
            assert!(!task.is_due(now), "{status} 不应被扫描");
        }
    }

    #[test]
    fn test_no_data_threshold_zero_never_pauses() {
        let mut task = sample_task();
        task.no_data_threshold = 0;
        task.no_data_count = 10;
        assert!(!task.no_data_exceeded());

        task.no_data_threshold = 3;
        task.no_data_count = 3;
        assert!(task.no_data_exceeded());
    }

    #[test]
    fn test_update_applies_only_set_fields() {
        let mut task = sample_task();
        task.error_message = Some("旧错误".to_string());

        let update = TaskUpdate::new()
            .status(TaskStatus::Running)
            .retry_count(2)
            .error_message(None);
        update.apply_to(&mut task);

        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.retry_count, 2);
        assert!(task.error_message.is_none());
        assert_eq!(task.keyword, "新能源");
        assert!(task.enabled);
    }

    #[test]
    fn test_filter_matches_monitor_queries() {
        let mut task = sample_task();
        task.status = TaskStatus::Failed;
        task.retry_count = 3;

        let filter = TaskFilter::default()
            .with_status(TaskStatus::Failed)
            .with_enabled(true)
            .retryable();
        assert!(!filter.matches(&task));

        task.retry_count = 2;
        assert!(filter.matches(&task));
    }
}
