use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use publisher_core::AppConfig;
use publisher_domain::TaskRepository;
use publisher_orchestrator::{BulkDispatcher, PlannerService, TaskLifecycle, Watchdog};

use crate::handlers::{
    health::liveness,
    metrics::render_metrics,
    ops::{
        bulk_cancel, bulk_enqueue, bulk_pause, bulk_resume, bulk_set_priority, ops_health,
        ops_list_tasks, run_watchdog,
    },
    plan::{apply_publish_plan, get_publish_plan},
    tasks::{
        cancel_task, enqueue_task, get_task, mark_ready_for_publish, pause_task, patch_task,
        process_task, resume_task, retry_publish,
    },
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub task_repo: Arc<dyn TaskRepository>,
    pub lifecycle: Arc<TaskLifecycle>,
    pub planner: Arc<PlannerService>,
    pub watchdog: Arc<Watchdog>,
    pub bulk: Arc<BulkDispatcher>,
    pub config: Arc<AppConfig>,
    pub metrics_handle: Option<PrometheusHandle>,
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    let cors_enabled = state.config.api.cors_enabled;

    let router = Router::new()
        // 存活探针与指标
        .route("/health", get(liveness))
        .route("/metrics", get(render_metrics))
        // 任务生命周期
        .route("/api/tasks/{id}", get(get_task).patch(patch_task))
        .route("/api/tasks/{id}/process", post(process_task))
        .route("/api/tasks/{id}/enqueue", post(enqueue_task))
        .route("/api/tasks/{id}/pause", post(pause_task))
        .route("/api/tasks/{id}/resume", post(resume_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        .route(
            "/api/tasks/{id}/mark-ready-for-publish",
            post(mark_ready_for_publish),
        )
        .route("/api/tasks/{id}/retry-publish", post(retry_publish))
        // 发布计划
        .route(
            "/api/projects/{id}/publish-plan",
            get(get_publish_plan),
        )
        .route(
            "/api/projects/{id}/publish-plan/apply",
            post(apply_publish_plan),
        )
        // 运维面
        .route("/api/ops/health", get(ops_health))
        .route("/api/ops/watchdog", post(run_watchdog))
        .route("/api/ops/tasks", get(ops_list_tasks))
        .route("/api/ops/tasks/bulk-enqueue", post(bulk_enqueue))
        .route("/api/ops/tasks/bulk-pause", post(bulk_pause))
        .route("/api/ops/tasks/bulk-resume", post(bulk_resume))
        .route("/api/ops/tasks/bulk-cancel", post(bulk_cancel))
        .route(
            "/api/ops/tasks/bulk-set-priority",
            post(bulk_set_priority),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    if cors_enabled {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}
