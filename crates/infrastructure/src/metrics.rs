//! Prometheus 指标
//!
//! 安装全局 recorder 并提供核心作业的打点入口，/metrics 端点
//! 直接渲染 handle。

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use publisher_core::{PublisherError, PublisherResult};

pub fn install_recorder() -> PublisherResult<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| PublisherError::config_error(format!("安装指标 recorder 失败: {e}")))
}

pub fn record_watchdog_pass(stuck: usize, dry_run: bool, duration_seconds: f64) {
    let mode = if dry_run { "dry_run" } else { "real" };
    counter!("publisher_watchdog_runs_total", "mode" => mode).increment(1);
    counter!("publisher_watchdog_stuck_total", "mode" => mode).increment(stuck as u64);
    histogram!("publisher_watchdog_duration_seconds").record(duration_seconds);
}

pub fn record_plan_apply(assigned: usize, failed: usize) {
    counter!("publisher_plan_apply_total").increment(1);
    counter!("publisher_plan_slots_assigned_total").increment(assigned as u64);
    counter!("publisher_plan_slots_failed_total").increment(failed as u64);
}

pub fn record_publish_attempt(success: bool) {
    let outcome = if success { "published" } else { "error" };
    counter!("publisher_publish_attempts_total", "outcome" => outcome).increment(1);
}
