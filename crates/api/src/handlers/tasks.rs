use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    response::{success, ApiResponse},
    routes::AppState,
};
use orchestrator_core::models::DependencyEdge;

/// 历史查询允许的最大条数
const MAX_HISTORY_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct HistoryQueryParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDependencies {
    pub task_id: i64,
    pub dependencies: Vec<DependencyEdge>,
    pub dependents: Vec<i64>,
}

/// 人工重置 FAILED/TIMEOUT 任务，其他状态返回 false
pub async fn reset_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.controller.reset_task(id).await?;
    let message = if outcome.result {
        "任务已重置为PENDING"
    } else {
        "任务当前状态不可重置"
    };
    Ok(ApiResponse::new(outcome).with_message(message))
}

impl HistoryQueryParams {
    fn validated_limit(&self) -> ApiResult<Option<usize>> {
        match self.limit {
            Some(limit) if limit == 0 || limit > MAX_HISTORY_LIMIT => Err(ApiError::BadRequest(
                format!("limit 必须在 1 到 {} 之间", MAX_HISTORY_LIMIT),
            )),
            limit => Ok(limit),
        }
    }
}

/// 状态迁移历史，最近的在前
pub async fn task_history(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.validated_limit()?;
    let history = state.controller.task_history(id, limit).await?;
    Ok(success(history))
}

/// 执行阶段记录，最近的在前
pub async fn task_phases(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<HistoryQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let limit = params.validated_limit()?;
    let phases = state.controller.task_phases(id, limit).await?;
    Ok(success(phases))
}

pub async fn task_prediction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let prediction = state.controller.task_prediction(id).await?;
    Ok(success(prediction))
}

/// 调度决策预览，不加锁也不预留资源
pub async fn task_schedulability(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let decision = state.controller.schedulability(id).await?;
    Ok(success(decision))
}

pub async fn task_dependencies(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let dependencies = state.controller.dependencies_of(id).await?;
    let dependents = state.controller.dependents_of(id).await?;
    Ok(success(TaskDependencies {
        task_id: id,
        dependencies,
        dependents,
    }))
}
