use axum::response::IntoResponse;

use crate::response::success;

/// 存活探针
pub async fn liveness() -> impl IntoResponse {
    success(serde_json::json!({ "status": "ok" }))
}
