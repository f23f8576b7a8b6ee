use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    response::success,
    routes::AppState,
};

#[derive(Debug, Deserialize)]
pub struct PlanParams {
    pub date: Option<String>,
    pub destination_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ApplyPlanRequest {
    pub date: Option<String>,
    pub base_priority: Option<i32>,
    #[serde(default)]
    pub enqueue: bool,
}

fn parse_date(raw: &Option<String>) -> Result<Option<NaiveDate>, ApiError> {
    match raw {
        None => Ok(None),
        Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("日期格式无效: {s}，应为 YYYY-MM-DD"))),
    }
}

/// 计算并返回发布计划（只读，不落库）
pub async fn get_publish_plan(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Query(params): Query<PlanParams>,
) -> ApiResult<impl IntoResponse> {
    let date = parse_date(&params.date)?;
    let plan = state
        .planner
        .plan(project_id, date, params.destination_id)
        .await?;
    Ok(success(plan))
}

/// 应用计划：写回优先级与排期时间，可选立即入队
pub async fn apply_publish_plan(
    State(state): State<AppState>,
    Path(project_id): Path<i64>,
    Json(request): Json<ApplyPlanRequest>,
) -> ApiResult<impl IntoResponse> {
    let date = parse_date(&request.date)?;
    let outcome = state
        .planner
        .apply(project_id, date, request.base_priority, request.enqueue)
        .await?;
    Ok(success(outcome))
}
