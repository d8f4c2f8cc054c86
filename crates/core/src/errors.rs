use thiserror::Error;

/// 编排核心错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("任务状态无效: {0}")]
    InvalidTaskState(String),

    #[error("检测到循环依赖: 任务 {task_id} 依赖 {depends_on} 会形成环")]
    CircularDependency { task_id: i64, depends_on: i64 },

    #[error("无效的依赖关系: {0}")]
    InvalidDependency(String),

    #[error("资源未找到: {0}")]
    ResourceNotFound(String),

    #[error("无效的爬取间隔: {0}")]
    InvalidInterval(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("无效的时间窗口: {0}")]
    InvalidWindow(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("缓存错误: {0}")]
    Cache(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    /// 基础设施暂时不可用导致的错误，任务回滚后下个周期重试
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Database(_)
                | SchedulerError::DatabaseOperation(_)
                | SchedulerError::MessageQueue(_)
                | SchedulerError::Cache(_)
        )
    }

    /// 上游组件违反约定，需要强制失败并交给运维处理
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidTaskState(_)
                | SchedulerError::InvalidWindow(_)
                | SchedulerError::InvalidInterval(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
