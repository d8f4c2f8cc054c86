use axum::{
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;

use crate::{error::ApiResult, response::success, routes::AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternQueryParams {
    pub task_id: Option<i64>,
}

/// 立即执行一次扫描调度
pub async fn trigger_scan(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let report = state.controller.trigger_scan().await?;
    Ok(success(report))
}

/// 立即执行一轮巡检，单个阶段失败只体现在报告里
pub async fn trigger_monitor(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(success(state.controller.trigger_monitor().await))
}

pub async fn get_stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let stats = state.controller.get_stats().await?;
    Ok(success(stats))
}

/// 状态迁移模式分析，可按任务过滤
pub async fn transition_patterns(
    State(state): State<AppState>,
    Query(params): Query<PatternQueryParams>,
) -> ApiResult<impl IntoResponse> {
    let patterns = state.controller.transition_patterns(params.task_id).await?;
    Ok(success(patterns))
}
