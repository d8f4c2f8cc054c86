//! 数据仓储层接口定义
//!
//! - `TaskRepository`：父任务的查询与乐观并发更新
//! - `FailedTaskRepository`：死信记录的持久化

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{FailedTask, NewFailedTask, Task, TaskFilter, TaskStatus, TaskUpdate};
use crate::SchedulerResult;

/// 父任务仓储
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 到期任务：`enabled = true` 且 `next_run_at` 为空或不晚于 `now`，按 `next_run_at` 升序（空值优先）
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> SchedulerResult<Vec<Task>>;

    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>>;

    /// 乐观条件更新
    ///
    /// 仅当行的 `status` 等于 `expected_status`（且给定时 `updated_at` 等于
    /// `expected_updated_at`）才写入，返回受影响行数。
    async fn conditional_transition(
        &self,
        id: i64,
        expected_status: TaskStatus,
        expected_updated_at: Option<DateTime<Utc>>,
        new_status: TaskStatus,
        fields: &TaskUpdate,
    ) -> SchedulerResult<u64>;

    /// 无条件更新，返回受影响行数
    async fn update(&self, id: i64, fields: &TaskUpdate) -> SchedulerResult<u64>;

    async fn find(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>>;

    async fn count(&self, filter: &TaskFilter) -> SchedulerResult<i64>;
}

/// 死信记录仓储
#[async_trait]
pub trait FailedTaskRepository: Send + Sync {
    async fn create(&self, failed_task: &NewFailedTask) -> SchedulerResult<FailedTask>;

    async fn list_pending_review(&self, limit: i64) -> SchedulerResult<Vec<FailedTask>>;

    async fn count_pending_review(&self) -> SchedulerResult<i64>;
}
