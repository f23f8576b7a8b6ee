use std::sync::Arc;

use chrono::{Duration, Utc};

use publisher_core::WatchdogConfig;
use publisher_domain::{TaskRepository, TaskStatus, WatchdogAction};
use publisher_orchestrator::{DefaultReadinessChecklist, TaskLifecycle, Watchdog};
use publisher_testing_utils::{
    MockDecisionLogRepository, MockProjectRepository, MockPublishAdapter, MockStepExecutor,
    MockTaskRepository, ProjectConfigBuilder, PublishTaskBuilder,
};

struct Fixture {
    watchdog: Watchdog,
    task_repo: Arc<MockTaskRepository>,
    decision_log: Arc<MockDecisionLogRepository>,
}

fn fixture(auto_requeue: bool) -> Fixture {
    let task_repo = Arc::new(MockTaskRepository::new());
    let project_repo = Arc::new(MockProjectRepository::new());
    let decision_log = Arc::new(MockDecisionLogRepository::new());
    project_repo.put_project(ProjectConfigBuilder::new().build());

    let lifecycle = Arc::new(TaskLifecycle::new(
        task_repo.clone(),
        project_repo,
        decision_log.clone(),
        Arc::new(MockStepExecutor::new()),
        Arc::new(MockPublishAdapter::new()),
        Arc::new(DefaultReadinessChecklist),
    ));

    let config = WatchdogConfig {
        enabled: true,
        interval_seconds: 300,
        stuck_processing_minutes: 30,
        stuck_publishing_minutes: 15,
        auto_requeue,
    };
    let watchdog = Watchdog::new(task_repo.clone(), decision_log.clone(), lifecycle, config);
    Fixture {
        watchdog,
        task_repo,
        decision_log,
    }
}

fn stale(id: i64, status: TaskStatus, minutes_ago: i64) -> publisher_domain::PublishTask {
    PublishTaskBuilder::new()
        .with_id(id)
        .with_status(status)
        .with_updated_at(Utc::now() - Duration::minutes(minutes_ago))
        .build()
}

#[tokio::test]
async fn test_stuck_processing_task_requeued_when_auto_requeue_enabled() {
    let f = fixture(true);
    f.task_repo.put(stale(1, TaskStatus::Processing, 45));

    let report = f.watchdog.run(false).await.unwrap();

    assert_eq!(report.stuck_count, 1);
    assert_eq!(report.stuck_processing, 1);
    assert_eq!(report.items[0].action, WatchdogAction::Requeued);
    assert!(report.items[0].age_minutes >= 45);

    let stored = f.task_repo.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Queued);
    assert!(stored.executor_job_id.is_none());

    let decisions = f.decision_log.all();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].action, "watchdog_stuck");
}

#[tokio::test]
async fn test_stuck_publishing_task_marked_error_with_synthetic_message() {
    let f = fixture(false);
    f.task_repo.put(stale(2, TaskStatus::Publishing, 20));

    let report = f.watchdog.run(false).await.unwrap();

    assert_eq!(report.stuck_publishing, 1);
    assert_eq!(report.items[0].action, WatchdogAction::MarkedError);

    let stored = f.task_repo.get_by_id(2).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Error);
    let message = stored.error_message.unwrap();
    assert!(message.starts_with("watchdog: stuck in publishing for"));
    assert!(message.ends_with('m'));
    assert!(stored.publish_error.is_some());
}

#[tokio::test]
async fn test_dry_run_reports_without_mutating() {
    let f = fixture(false);
    f.task_repo.put(stale(3, TaskStatus::Processing, 120));

    let report = f.watchdog.run(true).await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.items[0].action, WatchdogAction::WouldMarkError);

    let stored = f.task_repo.get_by_id(3).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
    assert!(f.decision_log.all().is_empty());
}

#[tokio::test]
async fn test_fresh_tasks_within_threshold_are_not_stuck() {
    let f = fixture(false);
    // 恰好等于阈值不算卡死
    f.task_repo.put(stale(4, TaskStatus::Processing, 30));
    f.task_repo.put(stale(5, TaskStatus::Publishing, 5));

    let report = f.watchdog.run(false).await.unwrap();
    assert_eq!(report.stuck_count, 0);

    assert_eq!(
        f.task_repo.get_by_id(4).await.unwrap().unwrap().status,
        TaskStatus::Processing
    );
}

#[tokio::test]
async fn test_watchdog_never_touches_other_statuses() {
    let f = fixture(false);
    for (id, status) in [
        (10, TaskStatus::Queued),
        (11, TaskStatus::Done),
        (12, TaskStatus::ReadyForPublish),
        (13, TaskStatus::Paused),
        (14, TaskStatus::Error),
        (15, TaskStatus::Published),
    ] {
        f.task_repo.put(stale(id, status, 600));
    }

    let report = f.watchdog.run(false).await.unwrap();
    assert_eq!(report.stuck_count, 0);

    for (id, status) in [
        (10, TaskStatus::Queued),
        (11, TaskStatus::Done),
        (12, TaskStatus::ReadyForPublish),
        (13, TaskStatus::Paused),
        (14, TaskStatus::Error),
        (15, TaskStatus::Published),
    ] {
        let stored = f.task_repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, status);
    }
}

#[tokio::test]
async fn test_concurrent_manual_action_wins_over_watchdog() {
    let f = fixture(false);
    let snapshot = stale(20, TaskStatus::Processing, 90);
    f.task_repo.put(snapshot.clone());

    // 扫描与执行之间，任务被并发路径改写
    let mut manual = snapshot.clone();
    manual.status = TaskStatus::Done;
    manual.updated_at = Utc::now();
    f.task_repo.put(manual);

    // 看门狗不会再看到 processing 任务，重复运行也安全
    let report = f.watchdog.run(false).await.unwrap();
    assert_eq!(report.stuck_count, 0);
    assert_eq!(
        f.task_repo.get_by_id(20).await.unwrap().unwrap().status,
        TaskStatus::Done
    );
}

#[tokio::test]
async fn test_health_overview_counts_and_flags() {
    let f = fixture(false);
    f.task_repo.put(stale(1, TaskStatus::Processing, 90));
    f.task_repo.put(stale(2, TaskStatus::Processing, 5));
    f.task_repo.put(stale(3, TaskStatus::Queued, 5));
    f.task_repo.put(stale(4, TaskStatus::Published, 5));

    let health = f.watchdog.health(true, false).await.unwrap();

    assert_eq!(health.counts.get("processing"), Some(&2));
    assert_eq!(health.counts.get("queued"), Some(&1));
    assert_eq!(health.counts.get("published"), Some(&1));
    assert_eq!(health.stuck.processing, 1);
    assert_eq!(health.stuck.publishing, 0);
    assert!(health.scheduler_enabled);
    assert!(!health.watchdog_enabled);
}
