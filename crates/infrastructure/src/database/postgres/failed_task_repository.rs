use async_trait::async_trait;
use orchestrator_core::{
    models::{FailedTask, FailedTaskStatus, NewFailedTask},
    traits::FailedTaskRepository,
    SchedulerError, SchedulerResult,
};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info, instrument};

pub struct PostgresFailedTaskRepository {
    pool: PgPool,
}

impl PostgresFailedTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_failed_task(row: &PgRow) -> SchedulerResult<FailedTask> {
        let status: String = row.try_get("status")?;
        let status = FailedTaskStatus::parse(&status).ok_or_else(|| {
            SchedulerError::DatabaseOperation(format!("未知的死信记录状态: {status}"))
        })?;

        Ok(FailedTask {
            id: row.try_get("id")?,
            message_id: row.try_get("message_id")?,
            original_queue: row.try_get("original_queue")?,
            failure_count: row.try_get("failure_count")?,
            last_error: row.try_get("last_error")?,
            payload: row.try_get("payload")?,
            status,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl FailedTaskRepository for PostgresFailedTaskRepository {
    #[instrument(skip(self, failed_task), fields(message_id = %failed_task.message_id))]
    async fn create(&self, failed_task: &NewFailedTask) -> SchedulerResult<FailedTask> {
        let row = sqlx::query(
            r#"
            INSERT INTO failed_tasks (message_id, original_queue, failure_count, last_error, payload, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, message_id, original_queue, failure_count, last_error, payload, status, created_at
            "#,
        )
        .bind(&failed_task.message_id)
        .bind(&failed_task.original_queue)
        .bind(failed_task.failure_count)
        .bind(&failed_task.last_error)
        .bind(&failed_task.payload)
        .bind(FailedTaskStatus::PendingReview.as_str())
        .fetch_one(&self.pool)
        .await?;

        let record = Self::row_to_failed_task(&row)?;
        info!(id = record.id, "死信记录已保存");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn list_pending_review(&self, limit: i64) -> SchedulerResult<Vec<FailedTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, message_id, original_queue, failure_count, last_error, payload, status, created_at
            FROM failed_tasks WHERE status = $1
            ORDER BY created_at DESC LIMIT $2
            "#,
        )
        .bind(FailedTaskStatus::PendingReview.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_failed_task).collect()
    }

    #[instrument(skip(self))]
    async fn count_pending_review(&self) -> SchedulerResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) FROM failed_tasks WHERE status = $1")
            .bind(FailedTaskStatus::PendingReview.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }
}
