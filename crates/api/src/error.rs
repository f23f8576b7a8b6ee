use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use publisher_core::PublisherError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Publisher(#[from] PublisherError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message, detail) = match &self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                serde_json::Value::Null,
            ),
            ApiError::Publisher(err) => match err {
                PublisherError::Validation(msg) => (
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_ERROR",
                    msg.clone(),
                    serde_json::Value::Null,
                ),
                PublisherError::TaskNotFound { id } => (
                    StatusCode::NOT_FOUND,
                    "TASK_NOT_FOUND",
                    format!("发布任务 {id} 不存在"),
                    serde_json::Value::Null,
                ),
                PublisherError::ProjectNotFound { id } => (
                    StatusCode::NOT_FOUND,
                    "PROJECT_NOT_FOUND",
                    format!("项目 {id} 不存在"),
                    serde_json::Value::Null,
                ),
                PublisherError::PreconditionFailed { status, operation } => (
                    StatusCode::PRECONDITION_FAILED,
                    "PRECONDITION_FAILED",
                    err.to_string(),
                    json!({ "status": status, "operation": operation }),
                ),
                // 就绪检查失败带回完整清单，调用方据此展示缺了什么
                PublisherError::ChecklistFailed { checks } => (
                    StatusCode::PRECONDITION_FAILED,
                    "CHECKLIST_FAILED",
                    "就绪检查未通过".to_string(),
                    json!({ "checks": checks }),
                ),
                PublisherError::AlreadyPublished { id } => (
                    StatusCode::CONFLICT,
                    "ALREADY_PUBLISHED",
                    format!("任务 {id} 已发布，重试需要 force=true"),
                    serde_json::Value::Null,
                ),
                // 过期写入：刷新后重试
                PublisherError::Conflict(msg) => (
                    StatusCode::CONFLICT,
                    "CONFLICT",
                    msg.clone(),
                    serde_json::Value::Null,
                ),
                PublisherError::Executor(msg) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "EXECUTOR_ERROR",
                    msg.clone(),
                    serde_json::Value::Null,
                ),
                other => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    other.to_string(),
                    serde_json::Value::Null,
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "type": error_type,
                "code": status.as_u16(),
                "detail": detail,
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
    use publisher_core::CheckResult;

    #[test]
    fn test_precondition_failed_maps_to_412() {
        let error = ApiError::Publisher(PublisherError::precondition("queued", "retry_publish"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn test_already_published_maps_to_409() {
        let error = ApiError::Publisher(PublisherError::AlreadyPublished { id: 5 });
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_conflict_maps_to_409() {
        let error = ApiError::Publisher(PublisherError::conflict("stale"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_checklist_failed_maps_to_412() {
        let error = ApiError::Publisher(PublisherError::ChecklistFailed {
            checks: vec![CheckResult::fail("final_artifact", "missing")],
        });
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn test_not_found_maps_to_404() {
        let error = ApiError::Publisher(PublisherError::task_not_found(1));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bad_request_maps_to_400() {
        let error = ApiError::BadRequest("bad date".to_string());
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
