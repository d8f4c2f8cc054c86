//! # Orchestrator API
//!
//! 爬取编排器的运维 HTTP 接口，基于 Axum 构建。
//!
//! ## API 端点
//!
//! - `POST /api/scheduler/scan` - 立即执行一次扫描调度
//! - `POST /api/monitor/run` - 立即执行一轮巡检
//! - `GET /api/stats` - 系统概况
//! - `GET /api/transitions/patterns?taskId=` - 状态迁移模式分析
//! - `POST /api/tasks/{id}/reset` - 重置 FAILED/TIMEOUT 任务
//! - `GET /api/tasks/{id}/history?limit=` - 状态迁移历史
//! - `GET /api/tasks/{id}/phases?limit=` - 执行阶段记录
//! - `GET /api/tasks/{id}/prediction` - 完成时间预测
//! - `GET /api/tasks/{id}/schedulability` - 调度决策预览
//! - `GET /api/tasks/{id}/dependencies` - 依赖与被依赖关系
//! - `POST /api/dependencies` - 添加依赖
//! - `DELETE /api/dependencies/{taskId}/{dependsOn}` - 删除依赖
//! - `GET /health` - 存活探针
//!
//! 成功响应统一为 `{success, data, message, timestamp}`，错误响应为
//! `{success: false, error: {message, type, code, suggestions, timestamp}}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use orchestrator_dispatcher::OperatorController;
use std::sync::Arc;
use tower::ServiceBuilder;

use middleware::{cors_layer, request_logging, trace_layer};
use routes::{create_routes, AppState};

/// 创建完整的API应用
pub fn create_app(controller: Arc<OperatorController>, cors_enabled: bool) -> Router {
    let router = create_routes(AppState { controller }).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    );
    if cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
