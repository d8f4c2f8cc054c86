//! # Orchestrator Core
//!
//! 爬取任务编排核心的共享层：错误类型、配置模型、数据模型、
//! 外部依赖（任务存储、消息队列、协调缓存）的端口接口以及时间工具。

pub mod config;
pub mod errors;
pub mod models;
pub mod time_utils;
pub mod traits;

pub use errors::{SchedulerError, SchedulerResult};
pub use models::{
    CrawlPhase, DependencyEdge, DependencyType, Message, MessageType, Task, TaskFilter,
    TaskStatus, TaskUpdate,
};
pub use traits::{CoordinationCache, FailedTaskRepository, MessageQueue, TaskRepository};
