//! 看门狗
//!
//! 周期性找出在 processing / publishing 停留过久的任务并按策略恢复。
//! 年龄以任务自身的 updated_at 度量，看门狗跑得晚不会造成误报。
//! 幂等，可与正常派发并发运行：写入走状态机的比较交换，输掉竞争
//! 的恢复动作以 conflict 记录并跳过。

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use publisher_core::{PublisherResult, WatchdogConfig};
use publisher_domain::{
    DecisionLogRepository, DecisionRecord, DecisionSummary, HealthOverview, StuckCounts,
    TaskRepository, TaskStatus, WatchdogAction, WatchdogItem, WatchdogReport, WatchdogThresholds,
};

use crate::lifecycle::TaskLifecycle;

pub struct Watchdog {
    task_repo: Arc<dyn TaskRepository>,
    decision_log: Arc<dyn DecisionLogRepository>,
    lifecycle: Arc<TaskLifecycle>,
    config: WatchdogConfig,
}

impl Watchdog {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        decision_log: Arc<dyn DecisionLogRepository>,
        lifecycle: Arc<TaskLifecycle>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            task_repo,
            decision_log,
            lifecycle,
            config,
        }
    }

    /// 扫描并恢复卡死任务；dry_run 时只评估不执行，裁决逻辑完全相同
    pub async fn run(&self, dry_run: bool) -> PublisherResult<WatchdogReport> {
        let now = Utc::now();
        let mut items: Vec<WatchdogItem> = Vec::new();
        let mut stuck_processing = 0usize;
        let mut stuck_publishing = 0usize;

        for (status, threshold) in [
            (TaskStatus::Processing, self.config.stuck_processing_minutes),
            (TaskStatus::Publishing, self.config.stuck_publishing_minutes),
        ] {
            let tasks = self.task_repo.get_by_status(status).await?;
            for task in tasks {
                let age_minutes = (now - task.updated_at).num_minutes();
                if age_minutes <= threshold {
                    continue;
                }
                match status {
                    TaskStatus::Processing => stuck_processing += 1,
                    _ => stuck_publishing += 1,
                }

                let message = format!("watchdog: stuck in {} for {}m", status, age_minutes);
                let action = if dry_run {
                    if self.config.auto_requeue {
                        WatchdogAction::WouldRequeue
                    } else {
                        WatchdogAction::WouldMarkError
                    }
                } else if self.config.auto_requeue {
                    match self.lifecycle.watchdog_requeue(&task).await {
                        Ok(_) => WatchdogAction::Requeued,
                        Err(e) => {
                            warn!("看门狗重新入队任务 {} 失败: {}", task.id, e);
                            WatchdogAction::Conflict
                        }
                    }
                } else {
                    match self.lifecycle.watchdog_mark_error(&task, &message).await {
                        Ok(_) => WatchdogAction::MarkedError,
                        Err(e) => {
                            warn!("看门狗标记任务 {} 出错失败: {}", task.id, e);
                            WatchdogAction::Conflict
                        }
                    }
                };

                if matches!(
                    action,
                    WatchdogAction::Requeued | WatchdogAction::MarkedError
                ) {
                    let record = DecisionRecord::new(
                        Some(task.project_id),
                        "watchdog_stuck",
                        json!({
                            "task_id": task.id,
                            "old_status": status.as_str(),
                            "age_minutes": age_minutes,
                            "action": action.as_str(),
                        }),
                    );
                    if let Err(e) = self.decision_log.append(&record).await {
                        warn!("写入看门狗决策日志失败: {}", e);
                    }
                }

                items.push(WatchdogItem {
                    task_id: task.id,
                    project_id: task.project_id,
                    old_status: status,
                    age_minutes,
                    action,
                    error_message: Some(message),
                });
            }
        }

        info!(
            "看门狗扫描完成: 发现 {} 个卡死任务 (dry_run={})",
            items.len(),
            dry_run
        );

        Ok(WatchdogReport {
            stuck_count: items.len(),
            stuck_processing,
            stuck_publishing,
            items,
            dry_run,
            run_at: now,
            thresholds: WatchdogThresholds {
                stuck_processing_minutes: self.config.stuck_processing_minutes,
                stuck_publishing_minutes: self.config.stuck_publishing_minutes,
                auto_requeue: self.config.auto_requeue,
            },
        })
    }

    /// 系统健康概览：状态分布、卡死计数、作业开关、最近决策
    ///
    /// 开关以参数注入，调用方在作业触发时读取一次配置。
    pub async fn health(
        &self,
        scheduler_enabled: bool,
        watchdog_enabled: bool,
    ) -> PublisherResult<HealthOverview> {
        let now = Utc::now();
        let counts = self
            .task_repo
            .count_by_status()
            .await?
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect();

        let mut stuck = StuckCounts {
            processing: 0,
            publishing: 0,
        };
        for (status, threshold) in [
            (TaskStatus::Processing, self.config.stuck_processing_minutes),
            (TaskStatus::Publishing, self.config.stuck_publishing_minutes),
        ] {
            let overdue = self
                .task_repo
                .get_by_status(status)
                .await?
                .into_iter()
                .filter(|t| (now - t.updated_at).num_minutes() > threshold)
                .count() as i64;
            match status {
                TaskStatus::Processing => stuck.processing = overdue,
                _ => stuck.publishing = overdue,
            }
        }

        let last_decisions = self
            .decision_log
            .recent(10)
            .await?
            .into_iter()
            .map(|r| DecisionSummary {
                action: r.action,
                at: r.created_at,
            })
            .collect();

        Ok(HealthOverview {
            counts,
            stuck,
            scheduler_enabled,
            watchdog_enabled,
            last_decisions,
        })
    }
}
