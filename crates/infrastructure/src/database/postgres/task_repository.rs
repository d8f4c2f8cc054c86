use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orchestrator_core::{
    models::{Task, TaskFilter, TaskStatus, TaskUpdate},
    traits::TaskRepository,
    SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Postgres, QueryBuilder, Row};
use tracing::{debug, instrument};

const TASK_COLUMNS: &str = "id, keyword, start_date, current_crawl_time, latest_crawl_time, \
    crawl_interval, next_run_at, status, enabled, progress, total_segments, no_data_count, \
    no_data_threshold, retry_count, max_retries, error_message, weibo_account_id, \
    enable_account_rotation, priority_hint, last_succeeded_at, last_completed_at, \
    created_at, updated_at";

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &PgRow) -> SchedulerResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            keyword: row.try_get("keyword")?,
            start_date: row.try_get("start_date")?,
            current_crawl_time: row.try_get("current_crawl_time")?,
            latest_crawl_time: row.try_get("latest_crawl_time")?,
            crawl_interval: row.try_get("crawl_interval")?,
            next_run_at: row.try_get("next_run_at")?,
            status: row.try_get("status")?,
            enabled: row.try_get("enabled")?,
            progress: row.try_get("progress")?,
            total_segments: row.try_get("total_segments")?,
            no_data_count: row.try_get("no_data_count")?,
            no_data_threshold: row.try_get("no_data_threshold")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            error_message: row.try_get("error_message")?,
            weibo_account_id: row.try_get("weibo_account_id")?,
            enable_account_rotation: row.try_get("enable_account_rotation")?,
            priority_hint: row.try_get("priority_hint")?,
            last_succeeded_at: row.try_get("last_succeeded_at")?,
            last_completed_at: row.try_get("last_completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// 生成 `SET` 子句，`updated_at` 总是刷新为当前时间
    fn push_assignments(builder: &mut QueryBuilder<'_, Postgres>, fields: &TaskUpdate) {
        builder.push("updated_at = NOW()");
        if let Some(status) = fields.status {
            builder.push(", status = ").push_bind(status);
        }
        if let Some(enabled) = fields.enabled {
            builder.push(", enabled = ").push_bind(enabled);
        }
        if let Some(at) = fields.next_run_at {
            builder.push(", next_run_at = ").push_bind(at);
        }
        if let Some(at) = fields.current_crawl_time {
            builder.push(", current_crawl_time = ").push_bind(at);
        }
        if let Some(at) = fields.latest_crawl_time {
            builder.push(", latest_crawl_time = ").push_bind(at);
        }
        if let Some(progress) = fields.progress {
            builder.push(", progress = ").push_bind(progress);
        }
        if let Some(total) = fields.total_segments {
            builder.push(", total_segments = ").push_bind(total);
        }
        if let Some(count) = fields.no_data_count {
            builder.push(", no_data_count = ").push_bind(count);
        }
        if let Some(count) = fields.retry_count {
            builder.push(", retry_count = ").push_bind(count);
        }
        if let Some(message) = &fields.error_message {
            builder.push(", error_message = ").push_bind(message.clone());
        }
        if let Some(at) = fields.last_succeeded_at {
            builder.push(", last_succeeded_at = ").push_bind(at);
        }
        if let Some(at) = fields.last_completed_at {
            builder.push(", last_completed_at = ").push_bind(at);
        }
    }

    fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &TaskFilter) {
        builder.push(" WHERE 1 = 1");
        if let Some(statuses) = &filter.statuses {
            let values: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            builder.push(" AND status = ANY(").push_bind(values).push(")");
        }
        if let Some(enabled) = filter.enabled {
            builder.push(" AND enabled = ").push_bind(enabled);
        }
        if let Some(before) = filter.updated_before {
            builder.push(" AND updated_at < ").push_bind(before);
        }
        if filter.retryable_only {
            builder.push(" AND retry_count < max_retries");
        }
        if filter.no_data_exceeded {
            builder.push(" AND no_data_threshold > 0 AND no_data_count >= no_data_threshold");
        }
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    #[instrument(skip(self))]
    async fn find_due(&self, now: DateTime<Utc>, limit: i64) -> SchedulerResult<Vec<Task>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE status = 'PENDING' AND enabled = TRUE \
             AND (next_run_at IS NULL OR next_run_at <= $1) \
             ORDER BY next_run_at ASC NULLS FIRST, id ASC LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;
        debug!("查询到 {} 个到期任务", tasks.len());
        Ok(tasks)
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i64) -> SchedulerResult<Option<Task>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, fields))]
    async fn conditional_transition(
        &self,
        id: i64,
        expected_status: TaskStatus,
        expected_updated_at: Option<DateTime<Utc>>,
        new_status: TaskStatus,
        fields: &TaskUpdate,
    ) -> SchedulerResult<u64> {
        let mut fields = fields.clone();
        fields.status = Some(new_status);

        let mut builder = QueryBuilder::<Postgres>::new("UPDATE tasks SET ");
        Self::push_assignments(&mut builder, &fields);
        builder
            .push(" WHERE id = ")
            .push_bind(id)
            .push(" AND status = ")
            .push_bind(expected_status);
        if let Some(updated_at) = expected_updated_at {
            builder.push(" AND updated_at = ").push_bind(updated_at);
        }

        let result = builder.build().execute(&self.pool).await?;
        debug!(
            task_id = id,
            from = %expected_status,
            to = %new_status,
            affected = result.rows_affected(),
            "条件状态迁移"
        );
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, fields))]
    async fn update(&self, id: i64, fields: &TaskUpdate) -> SchedulerResult<u64> {
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE tasks SET ");
        Self::push_assignments(&mut builder, fields);
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn find(&self, filter: &TaskFilter) -> SchedulerResult<Vec<Task>> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {TASK_COLUMNS} FROM tasks"));
        Self::push_filter(&mut builder, filter);
        builder.push(" ORDER BY updated_at ASC, id ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    #[instrument(skip(self))]
    async fn count(&self, filter: &TaskFilter) -> SchedulerResult<i64> {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks");
        Self::push_filter(&mut builder, filter);

        let row = builder.build().fetch_one(&self.pool).await?;
        Ok(row.try_get::<i64, _>(0)?)
    }
}
