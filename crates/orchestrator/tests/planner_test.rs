use std::sync::Arc;

use chrono::{Duration, NaiveDate, NaiveTime, Utc};

use publisher_domain::{
    PublishSettings, SelectionState, TaskRepository, TaskStatus, Window, DAY_ABBREV,
};
use publisher_orchestrator::{
    compute_plan, DefaultReadinessChecklist, DestinationSnapshot, EligibleTask, PlanInput,
    PlannerService, TaskLifecycle,
};
use publisher_testing_utils::{
    DestinationBuilder, MockDecisionLogRepository, MockProjectRepository, MockPublishAdapter,
    MockStepExecutor, MockTaskRepository, ProjectConfigBuilder, PublishTaskBuilder,
};

fn monday() -> NaiveDate {
    // 2025-08-04 是周一
    NaiveDate::from_ymd_opt(2025, 8, 4).unwrap()
}

fn single_window_settings(gap: i64) -> PublishSettings {
    let mut settings = PublishSettings::default();
    let window = vec![Window {
        start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(21, 0, 0).unwrap(),
    }];
    for day in DAY_ABBREV {
        settings.windows.insert(day.to_string(), window.clone());
    }
    settings.min_gap_minutes = gap;
    settings
}

fn eligible(id: i64, score: f64, account: i64) -> EligibleTask {
    EligibleTask {
        task: PublishTaskBuilder::new()
            .with_id(id)
            .with_status(TaskStatus::ReadyForPublish)
            .with_destination(account)
            .with_score(score)
            .with_candidate(id * 10)
            .build(),
        topic_signature: String::new(),
        author_key: String::new(),
    }
}

fn input_with(
    settings: PublishSettings,
    daily_limit: i32,
    already: i64,
    tasks: Vec<EligibleTask>,
) -> PlanInput {
    PlanInput {
        project: ProjectConfigBuilder::new()
            .with_publish_settings(settings)
            .build(),
        date: monday(),
        destinations: vec![DestinationSnapshot {
            destination: DestinationBuilder::new()
                .with_account(100)
                .with_daily_limit(daily_limit)
                .build(),
            already_published_today: already,
            state: SelectionState::default(),
            tasks,
        }],
    }
}

#[test]
fn test_plan_is_deterministic_for_identical_snapshot() {
    let mut settings = single_window_settings(90);
    settings.jitter_minutes = 15;
    let tasks = vec![
        eligible(1, 0.9, 100),
        eligible(2, 0.5, 100),
        eligible(3, 0.7, 100),
    ];
    let input = input_with(settings, 3, 0, tasks);

    let first = compute_plan(&input);
    let second = compute_plan(&input);

    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}

#[test]
fn test_daily_limit_scenario_from_capacity_one() {
    // daily_limit=2，当日已发布 1，三个候选 [0.9, 0.5, 0.2]，单时间窗
    // => 恰好一个槽位给 0.9，其余两个以 "daily limit reached" 跳过
    let tasks = vec![
        eligible(1, 0.9, 100),
        eligible(2, 0.5, 100),
        eligible(3, 0.2, 100),
    ];
    let input = input_with(single_window_settings(90), 2, 1, tasks);

    let plan = compute_plan(&input);
    let dest = &plan.destinations[0];

    assert_eq!(dest.slots.len(), 1);
    assert_eq!(dest.slots[0].task_id, 1);
    assert_eq!(dest.already_published_today, 1);

    let reasons: Vec<&str> = dest.skipped.iter().map(|s| s.reason.as_str()).collect();
    assert_eq!(reasons, vec!["daily limit reached", "daily limit reached"]);
    let skipped_ids: Vec<i64> = dest.skipped.iter().map(|s| s.task_id).collect();
    assert_eq!(skipped_ids, vec![2, 3]);
}

#[test]
fn test_slots_ordered_by_effective_score_and_respect_gap() {
    let tasks = vec![
        eligible(1, 0.2, 100),
        eligible(2, 0.9, 100),
        eligible(3, 0.5, 100),
    ];
    let input = input_with(single_window_settings(90), 5, 0, tasks);

    let plan = compute_plan(&input);
    let dest = &plan.destinations[0];

    let order: Vec<i64> = dest.slots.iter().map(|s| s.task_id).collect();
    assert_eq!(order, vec![2, 3, 1]);

    for pair in dest.slots.windows(2) {
        assert!(pair[1].time - pair[0].time >= Duration::minutes(90));
    }
    // 槽位越早优先级越高且单调递减
    assert!(dest.slots[0].priority > dest.slots[1].priority);
    assert!(dest.slots[1].priority > dest.slots[2].priority);
}

#[test]
fn test_no_eligible_window_day() {
    let mut settings = single_window_settings(90);
    settings.windows.remove("mon");
    let tasks = vec![eligible(1, 0.9, 100), eligible(2, 0.5, 100)];
    let input = input_with(settings, 3, 0, tasks);

    let plan = compute_plan(&input);
    let dest = &plan.destinations[0];

    assert!(dest.slots.is_empty());
    assert_eq!(dest.total_slots, 0);
    assert!(dest
        .skipped
        .iter()
        .all(|s| s.reason == "no eligible window"));
    assert_eq!(dest.skipped.len(), 2);
}

#[test]
fn test_zero_daily_limit_destination_fully_skipped() {
    let tasks = vec![eligible(1, 0.9, 100)];
    let input = input_with(single_window_settings(90), 0, 0, tasks);

    let plan = compute_plan(&input);
    let dest = &plan.destinations[0];
    assert!(dest.slots.is_empty());
    assert_eq!(dest.skipped[0].reason, "daily limit reached");
}

#[test]
fn test_no_remaining_slots_when_window_exhausted() {
    // 9:00-10:00 的窗口按 30 分钟步进只有两个槽位
    let mut settings = single_window_settings(30);
    let window = vec![Window {
        start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        end: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
    }];
    for day in DAY_ABBREV {
        settings.windows.insert(day.to_string(), window.clone());
    }
    let tasks = vec![
        eligible(1, 0.9, 100),
        eligible(2, 0.8, 100),
        eligible(3, 0.7, 100),
    ];
    let input = input_with(settings, 10, 0, tasks);

    let plan = compute_plan(&input);
    let dest = &plan.destinations[0];
    assert_eq!(dest.slots.len(), 2);
    assert_eq!(dest.skipped.len(), 1);
    assert_eq!(dest.skipped[0].reason, "no remaining slots");
}

#[test]
fn test_zero_destinations_yields_empty_plan() {
    let input = PlanInput {
        project: ProjectConfigBuilder::new().build(),
        date: monday(),
        destinations: vec![],
    };
    let plan = compute_plan(&input);
    assert!(plan.destinations.is_empty());
    assert_eq!(plan.total_assigned(), 0);
}

#[test]
fn test_recency_penalty_reorders_equal_scores() {
    let mut state = SelectionState::default();
    state.last_topic_signature = "cats".to_string();

    let mut repeat = eligible(1, 0.6, 100);
    repeat.topic_signature = "cats".to_string();
    let fresh = eligible(2, 0.55, 100);

    let input = PlanInput {
        project: ProjectConfigBuilder::new()
            .with_publish_settings(single_window_settings(90))
            .build(),
        date: monday(),
        destinations: vec![DestinationSnapshot {
            destination: DestinationBuilder::new().with_account(100).build(),
            already_published_today: 0,
            state,
            tasks: vec![repeat, fresh],
        }],
    };

    let plan = compute_plan(&input);
    let dest = &plan.destinations[0];
    // 0.6 - 0.15 = 0.45 < 0.55，新话题排到前面
    assert_eq!(dest.slots[0].task_id, 2);
    assert_eq!(dest.slots[1].task_id, 1);
    assert!(dest.slots[1].effective_score < dest.slots[1].score);
}

// ── PlannerService（带仓储）的规划与应用 ────────────────────

struct ServiceFixture {
    planner: PlannerService,
    task_repo: Arc<MockTaskRepository>,
    decision_log: Arc<MockDecisionLogRepository>,
}

fn service_fixture(daily_limit: i32) -> ServiceFixture {
    let task_repo = Arc::new(MockTaskRepository::new());
    let project_repo = Arc::new(MockProjectRepository::new());
    let decision_log = Arc::new(MockDecisionLogRepository::new());

    let mut project = ProjectConfigBuilder::new().build();
    project.publish = single_window_settings(90);
    project_repo.put_project(project);
    project_repo.put_destinations(
        1,
        vec![DestinationBuilder::new()
            .with_account(100)
            .with_daily_limit(daily_limit)
            .build()],
    );

    let lifecycle = Arc::new(TaskLifecycle::new(
        task_repo.clone(),
        project_repo.clone(),
        decision_log.clone(),
        Arc::new(MockStepExecutor::new()),
        Arc::new(MockPublishAdapter::new()),
        Arc::new(DefaultReadinessChecklist),
    ));
    let planner = PlannerService::new(
        task_repo.clone(),
        project_repo,
        decision_log.clone(),
        lifecycle,
    );
    ServiceFixture {
        planner,
        task_repo,
        decision_log,
    }
}

fn ready_task(id: i64, score: f64) -> publisher_domain::PublishTask {
    PublishTaskBuilder::new()
        .with_id(id)
        .with_status(TaskStatus::ReadyForPublish)
        .with_destination(100)
        .with_score(score)
        .build()
}

#[tokio::test]
async fn test_apply_writes_priority_and_schedule() {
    let f = service_fixture(3);
    f.task_repo.put(ready_task(1, 0.9));
    f.task_repo.put(ready_task(2, 0.5));
    f.task_repo.put(ready_task(3, 0.2));

    let outcome = f
        .planner
        .apply(1, Some(monday()), Some(10), false)
        .await
        .unwrap();

    assert_eq!(outcome.ok.len(), 3);
    assert!(outcome.failed.is_empty());
    assert_eq!(outcome.plan_summary.assigned, 3);

    // 槽位越早优先级越高
    let stored1 = f.task_repo.get_by_id(1).await.unwrap().unwrap();
    let stored2 = f.task_repo.get_by_id(2).await.unwrap().unwrap();
    let stored3 = f.task_repo.get_by_id(3).await.unwrap().unwrap();
    assert_eq!(stored1.priority, 10);
    assert_eq!(stored2.priority, 9);
    assert_eq!(stored3.priority, 8);
    assert!(stored1.scheduled_at.unwrap() < stored2.scheduled_at.unwrap());
    assert!(stored2.scheduled_at.unwrap() < stored3.scheduled_at.unwrap());

    let decisions = f.decision_log.all();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].action, "publish_plan_apply");
}

#[tokio::test]
async fn test_apply_is_idempotent_for_same_task_set_and_date() {
    let f = service_fixture(3);
    f.task_repo.put(ready_task(1, 0.9));
    f.task_repo.put(ready_task(2, 0.5));

    let first = f
        .planner
        .apply(1, Some(monday()), Some(10), false)
        .await
        .unwrap();
    assert_eq!(first.ok.len(), 2);

    let priorities_after_first: Vec<i32> = {
        let t1 = f.task_repo.get_by_id(1).await.unwrap().unwrap();
        let t2 = f.task_repo.get_by_id(2).await.unwrap().unwrap();
        vec![t1.priority, t2.priority]
    };

    let second = f
        .planner
        .apply(1, Some(monday()), Some(10), false)
        .await
        .unwrap();
    assert!(second.ok.is_empty());
    assert_eq!(second.failed.len(), 2);
    assert!(second
        .failed
        .iter()
        .all(|s| s.reason == "already scheduled"));

    let priorities_after_second: Vec<i32> = {
        let t1 = f.task_repo.get_by_id(1).await.unwrap().unwrap();
        let t2 = f.task_repo.get_by_id(2).await.unwrap().unwrap();
        vec![t1.priority, t2.priority]
    };
    assert_eq!(priorities_after_first, priorities_after_second);
}

#[tokio::test]
async fn test_apply_recounts_capacity_defensively() {
    // 规划后、应用前又有任务发布出去，apply 不会超过剩余容量
    let f = service_fixture(1);
    f.task_repo.put(ready_task(1, 0.9));
    f.task_repo.put(
        PublishTaskBuilder::new()
            .with_id(50)
            .with_status(TaskStatus::Published)
            .with_destination(100)
            .with_published_at(Utc::now())
            .build(),
    );

    // 当日已有 1 条发布，daily_limit=1 => 容量为零
    let today = Utc::now().date_naive();
    let outcome = f
        .planner
        .apply(1, Some(today), Some(10), false)
        .await
        .unwrap();

    assert!(outcome.ok.is_empty());
    assert!(outcome
        .failed
        .iter()
        .any(|s| s.reason == "daily limit reached"));
}

#[tokio::test]
async fn test_plan_for_unknown_project_is_validation_error() {
    let f = service_fixture(3);
    let err = f.planner.plan(99, Some(monday()), None).await.unwrap_err();
    assert!(matches!(
        err,
        publisher_core::PublisherError::ProjectNotFound { id: 99 }
    ));
}
