use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use publisher_domain::{TaskFilter, TaskRepository, TaskStatus};
use publisher_orchestrator::BulkOperation;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct WatchdogParams {
    /// 默认 dry_run，操作员先看裁决再放行
    #[serde(default = "default_dry_run")]
    pub dry_run: bool,
}

fn default_dry_run() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct OpsTaskParams {
    pub status: Option<String>,
    pub project_id: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct BulkIdsBody {
    pub ids: Vec<i64>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkPriorityBody {
    pub ids: Vec<i64>,
    pub priority: i32,
}

/// 系统健康概览
pub async fn ops_health(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let health = state
        .watchdog
        .health(state.config.scheduler.enabled, state.config.watchdog.enabled)
        .await?;
    Ok(success(health))
}

/// 手动触发一轮看门狗
pub async fn run_watchdog(
    State(state): State<AppState>,
    Query(params): Query<WatchdogParams>,
) -> ApiResult<impl IntoResponse> {
    let report = state.watchdog.run(params.dry_run).await?;
    Ok(success(report))
}

/// 运维任务列表
pub async fn ops_list_tasks(
    State(state): State<AppState>,
    Query(params): Query<OpsTaskParams>,
) -> ApiResult<impl IntoResponse> {
    let status = params
        .status
        .as_deref()
        .map(|s| {
            TaskStatus::parse(s).ok_or_else(|| ApiError::BadRequest(format!("未知状态: {s}")))
        })
        .transpose()?;

    let filter = TaskFilter {
        status,
        project_id: params.project_id,
        destination_account_id: None,
        limit: Some(params.limit.unwrap_or(200).clamp(1, 1000)),
        offset: None,
    };
    let tasks = state.task_repo.list(&filter).await?;
    let total = tasks.len();
    Ok(success(json!({ "tasks": tasks, "total": total })))
}

async fn bulk_ids(
    state: &AppState,
    operation: BulkOperation,
    ids: Vec<i64>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.bulk.apply(&operation, &ids).await;
    Ok(success(outcome))
}

pub async fn bulk_enqueue(
    State(state): State<AppState>,
    Json(body): Json<BulkIdsBody>,
) -> ApiResult<impl IntoResponse> {
    bulk_ids(&state, BulkOperation::Enqueue, body.ids).await
}

pub async fn bulk_pause(
    State(state): State<AppState>,
    Json(body): Json<BulkIdsBody>,
) -> ApiResult<impl IntoResponse> {
    bulk_ids(
        &state,
        BulkOperation::Pause {
            reason: body.reason,
        },
        body.ids,
    )
    .await
}

pub async fn bulk_resume(
    State(state): State<AppState>,
    Json(body): Json<BulkIdsBody>,
) -> ApiResult<impl IntoResponse> {
    bulk_ids(&state, BulkOperation::Resume, body.ids).await
}

pub async fn bulk_cancel(
    State(state): State<AppState>,
    Json(body): Json<BulkIdsBody>,
) -> ApiResult<impl IntoResponse> {
    bulk_ids(
        &state,
        BulkOperation::Cancel {
            reason: body.reason,
        },
        body.ids,
    )
    .await
}

pub async fn bulk_set_priority(
    State(state): State<AppState>,
    Json(body): Json<BulkPriorityBody>,
) -> ApiResult<impl IntoResponse> {
    bulk_ids(&state, BulkOperation::SetPriority(body.priority), body.ids).await
}
