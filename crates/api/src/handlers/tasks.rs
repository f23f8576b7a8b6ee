use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use publisher_core::PublisherError;
use publisher_domain::{TaskRepository, TaskStatus};

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RetryPublishParams {
    #[serde(default)]
    pub force: bool,
}

/// 操作员状态覆盖请求
#[derive(Debug, Deserialize)]
pub struct PatchTaskRequest {
    pub status: String,
    pub error_text: Option<String>,
}

/// 查询单个任务
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .task_repo
        .get_by_id(id)
        .await
        .map_err(ApiError::Publisher)?
        .ok_or(PublisherError::TaskNotFound { id })
        .map_err(ApiError::Publisher)?;
    Ok(success(task))
}

/// 触发 queued -> processing 并委派执行
pub async fn process_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let task = state.lifecycle.process(id).await?;
    Ok(success(task))
}

/// 重新入队（error 任务的重试入口）
pub async fn enqueue_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let task = state.lifecycle.enqueue(id).await?;
    Ok(success(task))
}

/// 请求暂停，执行中的任务在下一个安全检查点生效
pub async fn pause_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<impl IntoResponse> {
    let reason = body.and_then(|Json(b)| b.reason);
    let task = state.lifecycle.request_pause(id, reason).await?;
    Ok(success(task))
}

/// 恢复暂停的任务
pub async fn resume_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let task = state.lifecycle.resume(id).await?;
    Ok(success(task))
}

/// 请求取消，执行中的任务协作式停止
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    body: Option<Json<ReasonBody>>,
) -> ApiResult<impl IntoResponse> {
    let reason = body.and_then(|Json(b)| b.reason);
    let task = state.lifecycle.request_cancel(id, reason).await?;
    Ok(success(task))
}

/// 运行就绪检查单，全过则 done -> ready_for_publish；
/// 失败返回 412 和完整清单
pub async fn mark_ready_for_publish(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let (task, checks) = state.lifecycle.mark_ready_for_publish(id).await?;
    Ok(success(json!({
        "ok": true,
        "checks": checks,
        "task": task,
    })))
}

/// 重试发布；已发布且未带 force 返回 409
pub async fn retry_publish(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<RetryPublishParams>,
) -> ApiResult<impl IntoResponse> {
    let task = state.lifecycle.attempt_publish(id, params.force).await?;
    Ok(success(task))
}

/// 操作员覆盖状态，仅允许 done / error
pub async fn patch_task(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<PatchTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let target = TaskStatus::parse(&request.status)
        .ok_or_else(|| ApiError::BadRequest(format!("未知状态: {}", request.status)))?;
    let task = state
        .lifecycle
        .force_status(id, target, request.error_text)
        .await?;
    Ok(success(task))
}
