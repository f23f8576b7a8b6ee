use std::sync::Arc;

use publisher_domain::{TaskRepository, TaskStatus};
use publisher_orchestrator::{BulkDispatcher, BulkOperation, DefaultReadinessChecklist, TaskLifecycle};
use publisher_testing_utils::{
    MockDecisionLogRepository, MockProjectRepository, MockPublishAdapter, MockStepExecutor,
    MockTaskRepository, ProjectConfigBuilder, PublishTaskBuilder,
};

struct Fixture {
    bulk: BulkDispatcher,
    task_repo: Arc<MockTaskRepository>,
    executor: Arc<MockStepExecutor>,
}

fn fixture() -> Fixture {
    let task_repo = Arc::new(MockTaskRepository::new());
    let project_repo = Arc::new(MockProjectRepository::new());
    let executor = Arc::new(MockStepExecutor::new());
    project_repo.put_project(ProjectConfigBuilder::new().build());

    let lifecycle = Arc::new(TaskLifecycle::new(
        task_repo.clone(),
        project_repo,
        Arc::new(MockDecisionLogRepository::new()),
        executor.clone(),
        Arc::new(MockPublishAdapter::new()),
        Arc::new(DefaultReadinessChecklist),
    ));
    Fixture {
        bulk: BulkDispatcher::new(lifecycle),
        task_repo,
        executor,
    }
}

fn put(f: &Fixture, id: i64, status: TaskStatus) {
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(id)
            .with_status(status)
            .build(),
    );
}

#[tokio::test]
async fn test_bulk_cancel_partitions_mixed_set() {
    let f = fixture();
    put(&f, 1, TaskStatus::Queued);
    put(&f, 2, TaskStatus::Canceled);
    put(&f, 3, TaskStatus::Done);
    // id 4 不存在

    let outcome = f
        .bulk
        .apply(&BulkOperation::Cancel { reason: None }, &[1, 2, 3, 4])
        .await;

    assert_eq!(outcome.ok, vec![1, 3]);
    assert_eq!(outcome.failed.len(), 2);
    assert_eq!(outcome.failed[0].id, 2);
    assert_eq!(outcome.failed[0].reason, "invalid_status:canceled");
    assert_eq!(outcome.failed[1].id, 4);
    assert_eq!(outcome.failed[1].reason, "not_found");

    assert_eq!(
        f.task_repo.get_by_id(1).await.unwrap().unwrap().status,
        TaskStatus::Canceled
    );
    assert_eq!(
        f.task_repo.get_by_id(3).await.unwrap().unwrap().status,
        TaskStatus::Canceled
    );
}

#[tokio::test]
async fn test_bulk_enqueue_only_accepts_queued_and_error() {
    let f = fixture();
    put(&f, 1, TaskStatus::Error);
    put(&f, 2, TaskStatus::Queued);
    put(&f, 3, TaskStatus::Processing);
    put(&f, 4, TaskStatus::Published);

    let outcome = f.bulk.apply(&BulkOperation::Enqueue, &[1, 2, 3, 4]).await;

    assert_eq!(outcome.ok, vec![1, 2]);
    assert_eq!(outcome.failed.len(), 2);
    assert_eq!(outcome.failed[0].reason, "invalid_status:processing");
    assert_eq!(outcome.failed[1].reason, "invalid_status:published");
    assert_eq!(f.executor.dispatched_ids(), vec![1, 2]);
}

#[tokio::test]
async fn test_bulk_pause_and_resume_round_trip() {
    let f = fixture();
    put(&f, 1, TaskStatus::Queued);
    put(&f, 2, TaskStatus::Done);

    let paused = f
        .bulk
        .apply(
            &BulkOperation::Pause {
                reason: Some("maintenance".to_string()),
            },
            &[1, 2],
        )
        .await;
    assert_eq!(paused.ok, vec![1, 2]);

    for id in [1, 2] {
        let stored = f.task_repo.get_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Paused);
        assert_eq!(stored.pause_reason.as_deref(), Some("maintenance"));
    }

    let resumed = f.bulk.apply(&BulkOperation::Resume, &[1, 2]).await;
    assert_eq!(resumed.ok, vec![1, 2]);
    assert_eq!(
        f.task_repo.get_by_id(1).await.unwrap().unwrap().status,
        TaskStatus::Queued
    );
    assert_eq!(
        f.task_repo.get_by_id(2).await.unwrap().unwrap().status,
        TaskStatus::Done
    );
}

#[tokio::test]
async fn test_bulk_resume_rejects_non_paused() {
    let f = fixture();
    put(&f, 1, TaskStatus::Queued);

    let outcome = f.bulk.apply(&BulkOperation::Resume, &[1]).await;
    assert!(outcome.ok.is_empty());
    assert_eq!(outcome.failed[0].reason, "invalid_status:queued");
}

#[tokio::test]
async fn test_bulk_set_priority_clamps_and_skips_terminal() {
    let f = fixture();
    put(&f, 1, TaskStatus::Queued);
    put(&f, 2, TaskStatus::Published);

    let outcome = f.bulk.apply(&BulkOperation::SetPriority(42), &[1, 2]).await;

    assert_eq!(outcome.ok, vec![1]);
    assert_eq!(outcome.failed[0].reason, "invalid_status:published");
    assert_eq!(
        f.task_repo.get_by_id(1).await.unwrap().unwrap().priority,
        10
    );
}

#[tokio::test]
async fn test_bulk_never_raises_for_whole_batch() {
    let f = fixture();
    // 全部都是坏 ID，也要整理成 failed 而不是报错
    let outcome = f
        .bulk
        .apply(&BulkOperation::Cancel { reason: None }, &[91, 92, 93])
        .await;
    assert!(outcome.ok.is_empty());
    assert_eq!(outcome.failed.len(), 3);
    assert!(outcome.failed.iter().all(|x| x.reason == "not_found"));
}
