//! # Orchestrator Dispatcher
//!
//! 编排核心的各个组件：扫描调度、优先级与依赖管理、资源预留、
//! 监控重试、状态追踪、结果监听、死信消费，以及驱动它们的周期运行器。

pub mod consumer;
pub mod controller;
pub mod cron_utils;
pub mod dead_letter;
pub mod dependency_manager;
pub mod monitor;
pub mod periodic;
pub mod priority_manager;
pub mod resource_manager;
pub mod result_listener;
pub mod retry_service;
pub mod scheduler;
pub mod state_tracker;

pub use controller::{OperatorController, QueueNames, SystemStats, TimedResult};
pub use cron_utils::CronScheduler;
pub use dead_letter::DeadLetterConsumer;
pub use dependency_manager::DependencyManager;
pub use monitor::{MonitorReport, PassReport, TaskMonitor};
pub use periodic::PeriodicRunner;
pub use priority_manager::{DenialKind, PriorityManager, SchedulingDecision};
pub use resource_manager::{ReservationOutcome, ResourceManager, ResourceShortfall};
pub use result_listener::{ResultListener, ResultOutcome};
pub use retry_service::{RecoveryAction, RetryManager};
pub use scheduler::{ScanReport, TaskScheduler};
pub use state_tracker::StateTracker;
