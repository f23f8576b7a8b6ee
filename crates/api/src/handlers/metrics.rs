use axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::routes::AppState;

/// Prometheus 指标导出
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
