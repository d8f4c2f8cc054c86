//! # Orchestrator Domain
//!
//! 纯同步的领域策略，不做任何 IO：
//! - 子任务时间窗口规划
//! - 重试退避与超时判定
//! - 任务优先级计算
//! - 依赖图环检测与依赖类型判定
//! - 任务状态迁移规则

pub mod crawl_window;
pub mod dependency_graph;
pub mod dependency_rules;
pub mod priority;
pub mod retry_policy;
pub mod state_machine;

pub use crawl_window::{SubTaskWindow, WindowPlan, WindowPolicy};
pub use dependency_graph::DependencyGraph;
pub use dependency_rules::{evaluate_edge, EdgeStatus};
pub use priority::{PriorityAssessment, PriorityCalculator, PriorityContext, TaskPriority};
pub use retry_policy::{FailedTaskDecision, RetryPolicy, TimeoutDecision};
pub use state_machine::{ensure_transition, is_valid_transition};
