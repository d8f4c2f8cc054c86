//! Test data builders with sensible defaults

use chrono::{DateTime, Duration, Utc};
use orchestrator_core::models::{SubTaskResultMessage, Task, TaskStatus};
use orchestrator_core::time_utils::truncate_to_minute;

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            task: Task {
                id: 1,
                keyword: "测试关键词".to_string(),
                start_date: truncate_to_minute(now - Duration::days(3)),
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
            },
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.task.id = id;
        self
    }

    pub fn with_keyword(mut self, keyword: &str) -> Self {
        self.task.keyword = keyword.to_string();
        self
    }

    pub fn with_start_date(mut self, start_date: DateTime<Utc>) -> Self {
        self.task.start_date = start_date;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.task.enabled = enabled;
        self
    }

    pub fn with_interval(mut self, interval: &str) -> Self {
        self.task.crawl_interval = interval.to_string();
        self
    }

    pub fn with_next_run_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.task.next_run_at = at;
        self
    }

    /// 已完成首次爬取，高水位停在 `latest`
    pub fn steady_state(mut self, latest: DateTime<Utc>) -> Self {
        self.task.current_crawl_time = Some(latest);
        self.task.latest_crawl_time = Some(latest);
        self
    }

    pub fn with_current_crawl_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.task.current_crawl_time = at;
        self
    }

    pub fn with_latest_crawl_time(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.task.latest_crawl_time = at;
        self
    }

    pub fn with_retries(mut self, retry_count: i32, max_retries: i32) -> Self {
        self.task.retry_count = retry_count;
        self.task.max_retries = max_retries;
        self
    }

    pub fn with_no_data(mut self, count: i32, threshold: i32) -> Self {
        self.task.no_data_count = count;
        self.task.no_data_threshold = threshold;
        self
    }

    pub fn with_error_message(mut self, message: &str) -> Self {
        self.task.error_message = Some(message.to_string());
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.updated_at = at;
        self
    }

    pub fn with_account(mut self, account_id: i64, rotation: bool) -> Self {
        self.task.weibo_account_id = Some(account_id);
        self.task.enable_account_rotation = rotation;
        self
    }

    pub fn with_priority_hint(mut self, hint: i32) -> Self {
        self.task.priority_hint = Some(hint);
        self
    }

    pub fn with_last_completed_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.task.last_completed_at = at;
        self
    }

    pub fn with_last_succeeded_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.task.last_succeeded_at = at;
        self
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.task.created_at = at;
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for Worker result messages
pub struct SubTaskResultBuilder {
    result: SubTaskResultMessage,
}

impl SubTaskResultBuilder {
    pub fn new(task_id: i64) -> Self {
        let end = truncate_to_minute(Utc::now());
        Self {
            result: SubTaskResultMessage {
                task_id,
                success: true,
                window_start: end - Duration::hours(1),
                window_end: end,
                data_count: 10,
                is_initial_crawl: false,
                error_message: None,
            },
        }
    }

    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.result.window_start = start;
        self.result.window_end = end;
        self
    }

    pub fn with_data_count(mut self, count: i64) -> Self {
        self.result.data_count = count;
        self
    }

    pub fn initial(mut self) -> Self {
        self.result.is_initial_crawl = true;
        self
    }

    pub fn failed(mut self, error: &str) -> Self {
        self.result.success = false;
        self.result.error_message = Some(error.to_string());
        self
    }

    pub fn build(self) -> SubTaskResultMessage {
        self.result
    }
}
