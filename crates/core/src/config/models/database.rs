use anyhow::ensure;
use serde::{Deserialize, Serialize};

/// 任务存储（PostgreSQL）连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    /// 关闭后由外部工具管理表结构
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/crawl_orchestrator".to_string(),
            max_connections: 10,
            min_connections: 1,
            connection_timeout_seconds: 30,
            idle_timeout_seconds: 600,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.url.is_empty(), "数据库URL不能为空");
        ensure!(
            self.url.starts_with("postgresql://") || self.url.starts_with("postgres://"),
            "数据库URL必须是PostgreSQL格式"
        );
        ensure!(self.max_connections > 0, "最大连接数必须大于0");
        ensure!(
            self.min_connections <= self.max_connections,
            "最小连接数 {} 不能大于最大连接数 {}",
            self.min_connections,
            self.max_connections
        );
        ensure!(self.connection_timeout_seconds > 0, "连接超时时间必须大于0");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_postgres_url() {
        let config = DatabaseConfig {
            url: "mysql://localhost/crawl".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_min_above_max() {
        let config = DatabaseConfig {
            max_connections: 2,
            min_connections: 5,
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("最小连接数"));
    }
}
