pub mod api_observability;
pub mod app_config;
pub mod cache;
pub mod database;
pub mod dispatcher_monitor;
pub mod message_queue;
pub mod tracker_priority;

pub use api_observability::{ApiConfig, LogFormat, ObservabilityConfig};
pub use app_config::AppConfig;
pub use cache::{CacheBackend, CacheConfig};
pub use database::DatabaseConfig;
pub use dispatcher_monitor::{DispatcherConfig, MonitorConfig, RunSchedule};
pub use message_queue::{MessageQueueConfig, QueueBackend};
pub use tracker_priority::{PriorityConfig, ResourcesConfig, TrackerConfig};
