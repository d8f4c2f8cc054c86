use std::sync::Arc;
use std::time::Duration;

use orchestrator_core::{
    config::DatabaseConfig,
    traits::{FailedTaskRepository, TaskRepository},
    SchedulerError, SchedulerResult,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use super::postgres::{PostgresFailedTaskRepository, PostgresTaskRepository};

/// 数据库连接池与仓储工厂
pub struct DatabaseManager {
    pool: PgPool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> SchedulerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
            .connect(&config.url)
            .await
            .map_err(|e| SchedulerError::DatabaseOperation(format!("连接数据库失败: {e}")))?;

        info!(
            max_connections = config.max_connections,
            "数据库连接池已创建"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> SchedulerResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("数据库连接池已关闭");
    }

    pub fn task_repository(&self) -> Arc<dyn TaskRepository> {
        Arc::new(PostgresTaskRepository::new(self.pool.clone()))
    }

    pub fn failed_task_repository(&self) -> Arc<dyn FailedTaskRepository> {
        Arc::new(PostgresFailedTaskRepository::new(self.pool.clone()))
    }
}
