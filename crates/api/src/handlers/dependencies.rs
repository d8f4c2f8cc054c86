use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use orchestrator_core::models::{DependencyEdge, DependencyType};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
    routes::AppState,
};

/// 依赖创建请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDependencyRequest {
    pub task_id: i64,
    pub depends_on: i64,
    pub dependency_type: DependencyType,
    /// 最长等待秒数
    pub max_wait_time: Option<i64>,
    #[serde(default)]
    pub auto_resolve: bool,
}

impl CreateDependencyRequest {
    fn into_edge(self) -> DependencyEdge {
        let edge = DependencyEdge::new(self.task_id, self.depends_on, self.dependency_type);
        match self.max_wait_time {
            Some(seconds) => edge.with_max_wait(seconds, self.auto_resolve),
            None => edge,
        }
    }
}

/// 添加依赖，形成环时返回 409
pub async fn add_dependency(
    State(state): State<AppState>,
    Json(request): Json<CreateDependencyRequest>,
) -> ApiResult<impl IntoResponse> {
    let edge = request.into_edge();
    state.controller.add_dependency(edge.clone()).await?;
    Ok(created(edge))
}

pub async fn remove_dependency(
    State(state): State<AppState>,
    Path((task_id, depends_on)): Path<(i64, i64)>,
) -> ApiResult<impl IntoResponse> {
    if !state.controller.remove_dependency(task_id, depends_on).await? {
        return Err(ApiError::NotFound);
    }
    Ok(success(true))
}
