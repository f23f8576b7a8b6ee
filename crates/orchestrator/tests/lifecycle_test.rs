use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use publisher_core::PublisherError;
use publisher_domain::{ModerationMode, TaskRepository, TaskStatus};
use publisher_orchestrator::{
    ControlSignal, DefaultReadinessChecklist, ExecutionOutcome, TaskLifecycle,
};
use publisher_testing_utils::{
    MockDecisionLogRepository, MockProjectRepository, MockPublishAdapter, MockStepExecutor,
    MockTaskRepository, ProjectConfigBuilder, PublishTaskBuilder,
};

struct Fixture {
    lifecycle: TaskLifecycle,
    task_repo: Arc<MockTaskRepository>,
    project_repo: Arc<MockProjectRepository>,
    decision_log: Arc<MockDecisionLogRepository>,
    executor: Arc<MockStepExecutor>,
    adapter: Arc<MockPublishAdapter>,
}

fn fixture() -> Fixture {
    let task_repo = Arc::new(MockTaskRepository::new());
    let project_repo = Arc::new(MockProjectRepository::new());
    let decision_log = Arc::new(MockDecisionLogRepository::new());
    let executor = Arc::new(MockStepExecutor::new());
    let adapter = Arc::new(MockPublishAdapter::new());
    project_repo.put_project(ProjectConfigBuilder::new().build());

    let lifecycle = TaskLifecycle::new(
        task_repo.clone(),
        project_repo.clone(),
        decision_log.clone(),
        executor.clone(),
        adapter.clone(),
        Arc::new(DefaultReadinessChecklist),
    );
    Fixture {
        lifecycle,
        task_repo,
        project_repo,
        decision_log,
        executor,
        adapter,
    }
}

#[tokio::test]
async fn test_process_moves_queued_task_to_processing() {
    let f = fixture();
    f.task_repo
        .put(PublishTaskBuilder::new().with_id(1).build());

    let task = f.lifecycle.process(1).await.unwrap();

    assert_eq!(task.status, TaskStatus::Processing);
    assert!(task.processing_started_at.is_some());
    assert!(task.error_message.is_none());
    assert_eq!(f.executor.dispatched_ids(), vec![1]);

    let stored = f.task_repo.get_by_id(1).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Processing);
    assert!(stored.executor_job_id.is_some());
}

#[tokio::test]
async fn test_process_rejects_non_queued_task_and_leaves_it_unmodified() {
    let f = fixture();
    let before = PublishTaskBuilder::new()
        .with_id(2)
        .with_status(TaskStatus::Done)
        .build();
    f.task_repo.put(before.clone());

    let err = f.lifecycle.process(2).await.unwrap_err();
    assert!(matches!(
        err,
        PublisherError::PreconditionFailed { ref status, .. } if status == "done"
    ));

    let stored = f.task_repo.get_by_id(2).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
    assert_eq!(stored.updated_at, before.updated_at);
    assert!(f.executor.dispatched_ids().is_empty());
}

#[tokio::test]
async fn test_enqueue_retries_errored_task_and_clears_flags() {
    let f = fixture();
    let mut task = PublishTaskBuilder::new()
        .with_id(3)
        .with_status(TaskStatus::Error)
        .build();
    task.error_message = Some("step 2 failed".to_string());
    task.pause_requested_at = Some(Utc::now());
    f.task_repo.put(task);

    let saved = f.lifecycle.enqueue(3).await.unwrap();
    assert_eq!(saved.status, TaskStatus::Queued);
    assert!(saved.error_message.is_none());
    assert!(saved.pause_requested_at.is_none());
    assert_eq!(f.executor.dispatched_ids(), vec![3]);
}

#[tokio::test]
async fn test_executor_finished_routes_by_moderation_mode() {
    // manual 项目进 ready_for_review
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(4)
            .with_status(TaskStatus::Processing)
            .build(),
    );
    let task = f
        .lifecycle
        .executor_finished(
            4,
            ExecutionOutcome::Success {
                artifacts: json!({"final_video_path": "/data/4/final.mp4"}),
            },
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::ReadyForReview);
    assert!(task.executor_job_id.is_none());

    // auto 项目跳过审核直接 done
    let f = fixture();
    f.project_repo.put_project(
        ProjectConfigBuilder::new()
            .with_moderation_mode(ModerationMode::Auto)
            .build(),
    );
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(5)
            .with_status(TaskStatus::Processing)
            .build(),
    );
    let task = f
        .lifecycle
        .executor_finished(
            5,
            ExecutionOutcome::Success {
                artifacts: json!({}),
            },
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Done);
}

#[tokio::test]
async fn test_executor_failure_records_message() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(6)
            .with_status(TaskStatus::Processing)
            .build(),
    );
    let task = f
        .lifecycle
        .executor_finished(
            6,
            ExecutionOutcome::Failure {
                error: "ffmpeg exited with 1".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.error_message.as_deref(), Some("ffmpeg exited with 1"));
}

#[tokio::test]
async fn test_moderation_approve_and_reject() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(7)
            .with_status(TaskStatus::ReadyForReview)
            .build(),
    );
    let task = f.lifecycle.approve(7).await.unwrap();
    assert_eq!(task.status, TaskStatus::Done);

    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(8)
            .with_status(TaskStatus::ReadyForReview)
            .build(),
    );
    let task = f
        .lifecycle
        .reject(8, Some("watermark visible".to_string()))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.error_message.as_deref(), Some("watermark visible"));
}

#[tokio::test]
async fn test_mark_ready_for_publish_passes_checklist() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(9)
            .with_status(TaskStatus::Done)
            .build(),
    );

    let (task, checks) = f.lifecycle.mark_ready_for_publish(9).await.unwrap();
    assert_eq!(task.status, TaskStatus::ReadyForPublish);
    assert!(checks.iter().all(|c| c.ok));

    // 重复调用确定性失败，不会重复排期
    let err = f.lifecycle.mark_ready_for_publish(9).await.unwrap_err();
    assert!(matches!(
        err,
        PublisherError::PreconditionFailed { ref status, .. } if status == "ready_for_publish"
    ));
}

#[tokio::test]
async fn test_mark_ready_for_publish_fails_atomically_with_checklist() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(10)
            .with_status(TaskStatus::Done)
            .with_artifacts(json!({}))
            .build(),
    );

    let err = f.lifecycle.mark_ready_for_publish(10).await.unwrap_err();
    match err {
        PublisherError::ChecklistFailed { checks } => {
            let failing = checks.iter().find(|c| c.check == "final_artifact").unwrap();
            assert!(!failing.ok);
        }
        other => panic!("expected ChecklistFailed, got {other:?}"),
    }

    let stored = f.task_repo.get_by_id(10).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Done);
}

#[tokio::test]
async fn test_retry_publish_conflicts_without_force_and_overwrites_with_force() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(11)
            .with_status(TaskStatus::Published)
            .with_published_url("https://video.example/old")
            .build(),
    );

    let err = f.lifecycle.attempt_publish(11, false).await.unwrap_err();
    assert!(matches!(err, PublisherError::AlreadyPublished { id: 11 }));

    let task = f.lifecycle.attempt_publish(11, true).await.unwrap();
    assert_eq!(task.status, TaskStatus::Published);
    assert_eq!(
        task.published_url.as_deref(),
        Some("https://video.example/11")
    );
    assert_eq!(f.adapter.call_count(), 1);
}

#[tokio::test]
async fn test_retry_publish_rejected_for_queued_task() {
    let f = fixture();
    f.task_repo
        .put(PublishTaskBuilder::new().with_id(12).build());

    let err = f.lifecycle.attempt_publish(12, false).await.unwrap_err();
    assert!(matches!(
        err,
        PublisherError::PreconditionFailed { ref status, .. } if status == "queued"
    ));
}

#[tokio::test]
async fn test_publish_failure_stores_error_without_interpreting_it() {
    let f = fixture();
    f.adapter
        .push_result(Err("platform quota exceeded".to_string()));
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(13)
            .with_status(TaskStatus::ReadyForPublish)
            .build(),
    );

    let task = f.lifecycle.attempt_publish(13, false).await.unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task
        .publish_error
        .as_deref()
        .unwrap()
        .contains("platform quota exceeded"));
}

#[tokio::test]
async fn test_pause_of_idle_task_takes_effect_immediately() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(14)
            .with_status(TaskStatus::Done)
            .build(),
    );

    let task = f
        .lifecycle
        .request_pause(14, Some("operator break".to_string()))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Paused);
    assert!(task.pause_requested_at.is_some());
    assert!(task.paused_at.is_some());
    assert_eq!(task.paused_from, Some(TaskStatus::Done));

    let resumed = f.lifecycle.resume(14).await.unwrap();
    assert_eq!(resumed.status, TaskStatus::Done);
    assert!(resumed.pause_requested_at.is_none());
    assert!(resumed.paused_at.is_none());
}

#[tokio::test]
async fn test_pause_of_processing_task_waits_for_checkpoint() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(15)
            .with_status(TaskStatus::Processing)
            .build(),
    );

    let task = f.lifecycle.request_pause(15, None).await.unwrap();
    // 不会在步骤执行中途打断
    assert_eq!(task.status, TaskStatus::Processing);
    assert!(task.pause_requested_at.is_some());
    assert!(task.paused_at.is_none());

    let signal = f.lifecycle.checkpoint(15).await.unwrap();
    assert_eq!(signal, ControlSignal::Paused);
    let stored = f.task_repo.get_by_id(15).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Paused);
    assert!(stored.paused_at.is_some());
    assert_eq!(stored.paused_from, Some(TaskStatus::Processing));
}

#[tokio::test]
async fn test_cancel_wins_over_pause_at_checkpoint() {
    let f = fixture();
    let task = PublishTaskBuilder::new()
        .with_id(16)
        .with_status(TaskStatus::Processing)
        .with_pause_requested(Utc::now())
        .build();
    f.task_repo.put(task);

    f.lifecycle.request_cancel(16, None).await.unwrap();
    let signal = f.lifecycle.checkpoint(16).await.unwrap();
    assert_eq!(signal, ControlSignal::Canceled);

    let stored = f.task_repo.get_by_id(16).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Canceled);
    assert!(stored.canceled_at.is_some());
    assert!(stored.cancel_requested_at.is_some());
}

#[tokio::test]
async fn test_cancel_of_queued_task_revokes_executor_job() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(17)
            .with_executor_job("job-42")
            .build(),
    );

    let task = f.lifecycle.request_cancel(17, None).await.unwrap();
    assert_eq!(task.status, TaskStatus::Canceled);
    assert!(task.canceled_at.is_some());
    assert_eq!(f.executor.revoked_jobs(), vec!["job-42".to_string()]);
}

#[tokio::test]
async fn test_cancel_rejected_on_terminal_task() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(18)
            .with_status(TaskStatus::Canceled)
            .build(),
    );
    let err = f.lifecycle.request_cancel(18, None).await.unwrap_err();
    assert_eq!(err.bulk_reason(), "invalid_status:canceled");
}

#[tokio::test]
async fn test_force_status_override_logs_decision() {
    let f = fixture();
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(19)
            .with_status(TaskStatus::ReadyForReview)
            .build(),
    );

    let task = f
        .lifecycle
        .force_status(19, TaskStatus::Error, Some("bad transcript".to_string()))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.error_message.as_deref(), Some("bad transcript"));

    let decisions = f.decision_log.all();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].action, "manual_override");
}

#[tokio::test]
async fn test_force_status_rejects_arbitrary_targets() {
    let f = fixture();
    f.task_repo
        .put(PublishTaskBuilder::new().with_id(20).build());
    let err = f
        .lifecycle
        .force_status(20, TaskStatus::Published, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PublisherError::Validation(_)));
}

#[tokio::test]
async fn test_set_priority_clamps_and_rejects_terminal() {
    let f = fixture();
    f.task_repo
        .put(PublishTaskBuilder::new().with_id(21).build());
    let task = f.lifecycle.set_priority(21, 99).await.unwrap();
    assert_eq!(task.priority, 10);

    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(22)
            .with_status(TaskStatus::Published)
            .build(),
    );
    let err = f.lifecycle.set_priority(22, 5).await.unwrap_err();
    assert_eq!(err.bulk_reason(), "invalid_status:published");
}

#[tokio::test]
async fn test_stale_write_loses_with_conflict() {
    let f = fixture();
    let task = PublishTaskBuilder::new()
        .with_id(23)
        .with_status(TaskStatus::Processing)
        .build();
    f.task_repo.put(task.clone());

    // 快照读出后，另一个写者先行完成
    f.lifecycle
        .force_status(23, TaskStatus::Error, Some("manual".to_string()))
        .await
        .unwrap();

    // 基于过期快照的看门狗写入观察到冲突
    let err = f
        .lifecycle
        .watchdog_mark_error(&task, "watchdog: stuck in processing for 45m")
        .await
        .unwrap_err();
    assert!(matches!(err, PublisherError::Conflict(_)));

    let stored = f.task_repo.get_by_id(23).await.unwrap().unwrap();
    assert_eq!(stored.error_message.as_deref(), Some("manual"));
}

#[tokio::test]
async fn test_dispatch_failure_lands_task_in_error() {
    let f = fixture();
    f.executor.set_fail_dispatch(true);
    f.task_repo
        .put(PublishTaskBuilder::new().with_id(24).build());

    let err = f.lifecycle.process(24).await.unwrap_err();
    assert!(matches!(err, PublisherError::Executor(_)));

    let stored = f.task_repo.get_by_id(24).await.unwrap().unwrap();
    assert_eq!(stored.status, TaskStatus::Error);
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains("dispatch failed"));
}
