use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orchestrator_core::SchedulerError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("调度器错误: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("未找到资源")]
    NotFound,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, String, &'static str, Vec<String>) {
        match self {
            ApiError::Scheduler(SchedulerError::TaskNotFound { id }) => (
                StatusCode::NOT_FOUND,
                format!("任务 ID {} 不存在", id),
                "TASK_NOT_FOUND",
                vec!["请检查任务ID是否正确".to_string()],
            ),
            ApiError::Scheduler(e @ SchedulerError::CircularDependency { .. }) => (
                StatusCode::CONFLICT,
                e.to_string(),
                "CIRCULAR_DEPENDENCY",
                vec![
                    "请检查任务依赖关系，确保没有循环依赖".to_string(),
                    "使用 GET /api/tasks/{id}/dependencies 查看现有依赖".to_string(),
                ],
            ),
            ApiError::Scheduler(
                e @ (SchedulerError::InvalidDependency(_)
                | SchedulerError::InvalidTaskState(_)
                | SchedulerError::InvalidInterval(_)
                | SchedulerError::InvalidCron { .. }
                | SchedulerError::InvalidWindow(_)),
            ) => (
                StatusCode::BAD_REQUEST,
                e.to_string(),
                "INVALID_REQUEST",
                vec!["请检查请求参数是否符合要求".to_string()],
            ),
            ApiError::Scheduler(e @ SchedulerError::ResourceNotFound(_)) => (
                StatusCode::NOT_FOUND,
                e.to_string(),
                "RESOURCE_NOT_FOUND",
                vec!["请检查资源名称是否已在配置中声明".to_string()],
            ),
            ApiError::Scheduler(e) if e.is_transient() => (
                StatusCode::SERVICE_UNAVAILABLE,
                "依赖的基础设施暂时不可用".to_string(),
                "SERVICE_UNAVAILABLE",
                vec![
                    "请稍后重试".to_string(),
                    "查看 GET /health 检查系统状态".to_string(),
                ],
            ),
            ApiError::Scheduler(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "系统内部错误".to_string(),
                "INTERNAL_ERROR",
                vec!["如果问题持续存在，请联系系统管理员".to_string()],
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                format!("请求参数错误: {}", msg),
                "BAD_REQUEST",
                vec!["请检查请求格式和参数".to_string()],
            ),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                "请求的资源不存在".to_string(),
                "NOT_FOUND",
                vec!["请检查请求URL是否正确".to_string()],
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, error_type, suggestions) = self.parts();
        if status.is_server_error() {
            tracing::error!("请求处理失败: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "suggestions": suggestions,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_not_found_maps_to_404() {
        let error: ApiError = SchedulerError::TaskNotFound { id: 123 }.into();
        assert_eq!(error.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_cycle_maps_to_409() {
        let error: ApiError = SchedulerError::CircularDependency {
            task_id: 1,
            depends_on: 2,
        }
        .into();
        assert_eq!(error.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_invalid_input_maps_to_400() {
        let cases = vec![
            SchedulerError::InvalidDependency("maxWaitTime 必须为正数".to_string()),
            SchedulerError::InvalidInterval("1x".to_string()),
            SchedulerError::InvalidCron {
                expr: "bad".to_string(),
                message: "parse".to_string(),
            },
        ];
        for case in cases {
            let error: ApiError = case.into();
            assert_eq!(error.into_response().status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn test_infrastructure_errors_map_to_503() {
        let error: ApiError = SchedulerError::Cache("连接被拒绝".to_string()).into();
        assert_eq!(error.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let error: ApiError = SchedulerError::Internal("bug".to_string()).into();
        assert_eq!(error.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_display() {
        assert_eq!(ApiError::NotFound.to_string(), "未找到资源");
    }
}
