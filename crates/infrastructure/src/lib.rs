//! # Orchestrator Infrastructure
//!
//! 外部依赖的具体实现：PostgreSQL 任务存储、RabbitMQ 消息队列、
//! Redis 协调缓存，以及嵌入式部署使用的内存实现。

pub mod cache;
pub mod database;
pub mod in_memory_queue;
pub mod message_queue;
pub mod observability;

pub use cache::{InMemoryCoordinationCache, RedisCoordinationCache};
pub use database::{DatabaseManager, PostgresFailedTaskRepository, PostgresTaskRepository};
pub use in_memory_queue::InMemoryMessageQueue;
pub use message_queue::RabbitMQMessageQueue;
pub use observability::{init_metrics, MetricsCollector};
