use axum::{
    routing::{delete, get, post},
    Router,
};
use orchestrator_dispatcher::OperatorController;
use std::sync::Arc;

use crate::handlers::{
    dependencies::{add_dependency, remove_dependency},
    health::health_check,
    operations::{get_stats, transition_patterns, trigger_monitor, trigger_scan},
    tasks::{
        reset_task, task_dependencies, task_history, task_phases, task_prediction,
        task_schedulability,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<OperatorController>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查
        .route("/health", get(health_check))
        // 运维触发
        .route("/api/scheduler/scan", post(trigger_scan))
        .route("/api/monitor/run", post(trigger_monitor))
        .route("/api/stats", get(get_stats))
        .route("/api/transitions/patterns", get(transition_patterns))
        // 任务
        .route("/api/tasks/{id}/reset", post(reset_task))
        .route("/api/tasks/{id}/history", get(task_history))
        .route("/api/tasks/{id}/phases", get(task_phases))
        .route("/api/tasks/{id}/prediction", get(task_prediction))
        .route("/api/tasks/{id}/schedulability", get(task_schedulability))
        .route("/api/tasks/{id}/dependencies", get(task_dependencies))
        // 依赖管理
        .route("/api/dependencies", post(add_dependency))
        .route(
            "/api/dependencies/{task_id}/{depends_on}",
            delete(remove_dependency),
        )
        .with_state(state)
}
