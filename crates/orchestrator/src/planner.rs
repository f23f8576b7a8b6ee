//! 槽位规划器
//!
//! `compute_plan` 是纯函数：给定快照（任务、评分、目的地配置、当日
//! 已发布数）输出 Plan，不做任何写入。对同一快照重复调用产出逐字节
//! 相同的结果，抖动也来自 (日期, 目的地) 派生的种子。
//! 只有 `apply` 会通过状态机的允许路径改动任务。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::{info, warn};

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::{
    day_key, AppliedSlot, ApplyOutcome, ApplySummary, DecisionLogRepository, DecisionRecord,
    DestPlan, Destination, Plan, ProjectConfig, ProjectRepository, PublishSettings, PublishTask,
    SelectionState, SkippedTask, Slot, TaskFilter, TaskRepository, TaskStatus,
};

use crate::lifecycle::TaskLifecycle;
use crate::scoring::{self, ScoreEntry};

/// 近期历史回看窗口，用于构建有效分惩罚状态
const RECENT_HISTORY_HOURS: i64 = 12;
const RECENT_HISTORY_LIMIT: i64 = 5;

pub const REASON_NO_REMAINING_SLOTS: &str = "no remaining slots";
pub const REASON_DAILY_LIMIT: &str = "daily limit reached";
pub const REASON_NO_WINDOW: &str = "no eligible window";
pub const REASON_ALREADY_SCHEDULED: &str = "already scheduled";
pub const REASON_ALREADY_PUBLISHED: &str = "already published";
pub const REASON_NO_ARTIFACT: &str = "no video artifact";

/// 可排期任务及其评分元数据
#[derive(Debug, Clone)]
pub struct EligibleTask {
    pub task: PublishTask,
    pub topic_signature: String,
    pub author_key: String,
}

/// 单个目的地的规划输入
#[derive(Debug, Clone)]
pub struct DestinationSnapshot {
    pub destination: Destination,
    pub already_published_today: i64,
    pub state: SelectionState,
    pub tasks: Vec<EligibleTask>,
}

/// 规划输入快照：重复规划同一快照是确定性的
#[derive(Debug, Clone)]
pub struct PlanInput {
    pub project: ProjectConfig,
    pub date: NaiveDate,
    pub destinations: Vec<DestinationSnapshot>,
}

/// 计算指定日期的候选槽位时间：各时间窗拼接，按 min_gap 步进，
/// 跳过当日已占用的最早 `skip` 个
pub fn candidate_slot_times(
    settings: &PublishSettings,
    date: NaiveDate,
    skip: usize,
) -> Vec<DateTime<Utc>> {
    let gap = Duration::minutes(settings.min_gap_minutes.max(1));
    let mut times = Vec::new();

    for window in settings.windows_for(date.weekday()) {
        let end = date.and_time(window.end);
        let mut current = date.and_time(window.start);
        // 时间窗含头不含尾
        while current < end {
            if let Some(local) = settings.timezone.from_local_datetime(&current).earliest() {
                times.push(local.with_timezone(&Utc));
            }
            current = current + gap;
        }
    }

    times.into_iter().skip(skip).collect()
}

/// 槽位次序到优先级的单调映射：越早的槽位优先级越高
pub fn priority_for_rank(base_priority: i32, rank: usize) -> i32 {
    (base_priority - rank as i32).clamp(-10, 10)
}

fn plan_seed(date: NaiveDate, destination_id: i64) -> u64 {
    (date.num_days_from_ce() as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (destination_id as u64)
}

/// 有界抖动：不早于原槽位、不破坏与前一槽位的最小间隔
fn jittered(
    raw: DateTime<Utc>,
    prev: Option<DateTime<Utc>>,
    gap: Duration,
    jitter_minutes: i64,
    rng: &mut StdRng,
) -> DateTime<Utc> {
    let lo = match prev {
        Some(p) => std::cmp::max(raw, p + gap),
        None => raw,
    };
    if jitter_minutes <= 0 {
        return lo;
    }
    let hi = raw + Duration::minutes(jitter_minutes);
    if hi <= lo {
        return lo;
    }
    let span = (hi - lo).num_minutes();
    lo + Duration::minutes(rng.random_range(0..=span))
}

/// 计算整个项目某天的发布计划（只读）
pub fn compute_plan(input: &PlanInput) -> Plan {
    let settings = &input.project.publish;
    let weekday = input.date.weekday();

    let destinations = input
        .destinations
        .iter()
        .map(|snap| plan_destination(settings, input.date, snap))
        .collect();

    Plan {
        project_id: input.project.id,
        date: input.date,
        timezone: settings.timezone.name().to_string(),
        day: day_key(weekday).to_string(),
        windows: settings.windows_for(weekday).to_vec(),
        min_gap_minutes: settings.min_gap_minutes,
        destinations,
    }
}

fn plan_destination(
    settings: &PublishSettings,
    date: NaiveDate,
    snap: &DestinationSnapshot,
) -> DestPlan {
    let dest = &snap.destination;
    let already = snap.already_published_today.max(0);
    let mut skipped: Vec<SkippedTask> = Vec::new();
    let mut entries: Vec<ScoreEntry> = Vec::new();
    let by_id: HashMap<i64, &PublishTask> =
        snap.tasks.iter().map(|et| (et.task.id, &et.task)).collect();

    // 预筛：排过期的、已发布的、缺产物的任务直接给出原因
    for et in &snap.tasks {
        let task = &et.task;
        if task.scheduled_at.is_some() {
            skipped.push(SkippedTask {
                task_id: task.id,
                reason: REASON_ALREADY_SCHEDULED.to_string(),
            });
            continue;
        }
        if task.has_publish_result() {
            skipped.push(SkippedTask {
                task_id: task.id,
                reason: REASON_ALREADY_PUBLISHED.to_string(),
            });
            continue;
        }
        if task.artifact_str("final_video_path").is_empty()
            && task.artifact_str("ready_video_path").is_empty()
        {
            skipped.push(SkippedTask {
                task_id: task.id,
                reason: REASON_NO_ARTIFACT.to_string(),
            });
            continue;
        }
        entries.push(ScoreEntry {
            task_id: task.id,
            base_score: task.virality_score.unwrap_or(0.0),
            priority: task.priority,
            topic_signature: et.topic_signature.clone(),
            author_key: et.author_key.clone(),
        });
    }

    let ranked = scoring::rank(&entries, &snap.state);

    let base = DestPlan {
        destination_id: dest.id,
        social_account_id: dest.social_account_id,
        platform: dest.platform.clone(),
        already_published_today: already,
        daily_limit: dest.daily_limit,
        total_slots: 0,
        slots: Vec::new(),
        skipped,
    };

    // 容量为零或负的目的地整体跳过
    if dest.daily_limit <= 0 {
        let mut plan = base;
        for st in ranked {
            plan.skipped.push(SkippedTask {
                task_id: st.task_id,
                reason: REASON_DAILY_LIMIT.to_string(),
            });
        }
        return plan;
    }

    // 当天没有时间窗：零槽位，任务全部跳过
    if settings.windows_for(date.weekday()).is_empty() {
        let mut plan = base;
        for st in ranked {
            plan.skipped.push(SkippedTask {
                task_id: st.task_id,
                reason: REASON_NO_WINDOW.to_string(),
            });
        }
        return plan;
    }

    let capacity = (dest.daily_limit as i64 - already).max(0) as usize;
    let times = candidate_slot_times(settings, date, already as usize);
    let gap = Duration::minutes(settings.min_gap_minutes.max(1));
    let mut rng = StdRng::seed_from_u64(plan_seed(date, dest.id));

    let mut plan = base;
    plan.total_slots = times.len().min(capacity);

    let mut time_index = 0usize;
    let mut prev: Option<DateTime<Utc>> = None;

    for st in ranked {
        if plan.slots.len() >= capacity {
            plan.skipped.push(SkippedTask {
                task_id: st.task_id,
                reason: REASON_DAILY_LIMIT.to_string(),
            });
            continue;
        }
        let Some(raw) = times.get(time_index).copied() else {
            plan.skipped.push(SkippedTask {
                task_id: st.task_id,
                reason: REASON_NO_REMAINING_SLOTS.to_string(),
            });
            continue;
        };
        time_index += 1;

        let time = jittered(raw, prev, gap, settings.jitter_minutes, &mut rng);
        prev = Some(time);

        let rank = plan.slots.len();
        plan.slots.push(Slot {
            time,
            task_id: st.task_id,
            candidate_id: by_id.get(&st.task_id).and_then(|t| t.candidate_id),
            score: st.base_score,
            effective_score: st.effective_score,
            priority: priority_for_rank(settings.base_priority, rank),
            reason: "ranked".to_string(),
        });
    }

    plan
}

/// 一天在目的地时区里的 UTC 边界
fn day_bounds(tz: Tz, date: NaiveDate) -> PublisherResult<(DateTime<Utc>, DateTime<Utc>)> {
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| PublisherError::validation("无法构造日期边界"))?;
    let start = tz
        .from_local_datetime(&midnight)
        .earliest()
        .ok_or_else(|| PublisherError::validation(format!("日期 {date} 在时区 {tz} 内无效")))?
        .with_timezone(&Utc);
    Ok((start, start + Duration::days(1)))
}

/// 规划服务：从仓储取快照、计算、以及带防御性复查的 apply
pub struct PlannerService {
    task_repo: Arc<dyn TaskRepository>,
    project_repo: Arc<dyn ProjectRepository>,
    decision_log: Arc<dyn DecisionLogRepository>,
    lifecycle: Arc<TaskLifecycle>,
}

impl PlannerService {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        project_repo: Arc<dyn ProjectRepository>,
        decision_log: Arc<dyn DecisionLogRepository>,
        lifecycle: Arc<TaskLifecycle>,
    ) -> Self {
        Self {
            task_repo,
            project_repo,
            decision_log,
            lifecycle,
        }
    }

    /// 读取一致性快照：合格任务、当日已发布数、近期历史
    pub async fn build_input(
        &self,
        project_id: i64,
        date: Option<NaiveDate>,
        destination_id: Option<i64>,
    ) -> PublisherResult<PlanInput> {
        let project = self
            .project_repo
            .get_by_id(project_id)
            .await?
            .ok_or_else(|| PublisherError::project_not_found(project_id))?;

        let tz = project.publish.timezone;
        let now = Utc::now();
        let date = date.unwrap_or_else(|| now.with_timezone(&tz).date_naive());
        let (day_start, day_end) = day_bounds(tz, date)?;

        let eligible = self
            .task_repo
            .list(&TaskFilter {
                status: Some(TaskStatus::ReadyForPublish),
                project_id: Some(project_id),
                ..Default::default()
            })
            .await?;

        let mut destinations = Vec::new();
        for dest in self
            .project_repo
            .destinations_for_project(project_id)
            .await?
            .into_iter()
            .filter(|d| d.is_active)
        {
            if let Some(want) = destination_id {
                if dest.id != want {
                    continue;
                }
            }

            let already = self
                .task_repo
                .count_published_between(project_id, dest.social_account_id, day_start, day_end)
                .await?;

            let recent = self
                .task_repo
                .recent_published(
                    project_id,
                    dest.social_account_id,
                    now - Duration::hours(RECENT_HISTORY_HOURS),
                    RECENT_HISTORY_LIMIT,
                )
                .await?;
            let mut state = SelectionState::default();
            for (i, t) in recent.iter().enumerate() {
                let topic = t.artifact_str("topic_signature").to_string();
                let author = t.artifact_str("author_key").to_string();
                if i == 0 {
                    state.last_topic_signature = topic.clone();
                    state.last_author_key = author.clone();
                }
                if !topic.is_empty() {
                    state.recent_topic_signatures.insert(topic);
                }
                if !author.is_empty() {
                    state.recent_author_keys.insert(author);
                }
            }

            let tasks = eligible
                .iter()
                .filter(|t| t.destination_account_id == dest.social_account_id)
                .map(|t| EligibleTask {
                    topic_signature: t.artifact_str("topic_signature").to_string(),
                    author_key: t.artifact_str("author_key").to_string(),
                    task: t.clone(),
                })
                .collect();

            destinations.push(DestinationSnapshot {
                destination: dest,
                already_published_today: already,
                state,
                tasks,
            });
        }

        Ok(PlanInput {
            project,
            date,
            destinations,
        })
    }

    /// 计算计划（只读）
    pub async fn plan(
        &self,
        project_id: i64,
        date: Option<NaiveDate>,
        destination_id: Option<i64>,
    ) -> PublisherResult<Plan> {
        let input = self.build_input(project_id, date, destination_id).await?;
        Ok(compute_plan(&input))
    }

    /// 计算并应用计划：写优先级与排期时间，可选触发入队。
    /// 对同一任务集合和日期重复 apply 是幂等的，已排期的任务报
    /// "already scheduled" 而不是被重复排期。
    pub async fn apply(
        &self,
        project_id: i64,
        date: Option<NaiveDate>,
        base_priority: Option<i32>,
        enqueue: bool,
    ) -> PublisherResult<ApplyOutcome> {
        let mut input = self.build_input(project_id, date, None).await?;
        if let Some(bp) = base_priority {
            input.project.publish.base_priority = bp;
        }
        let tz = input.project.publish.timezone;
        let plan = compute_plan(&input);
        let (day_start, day_end) = day_bounds(tz, plan.date)?;

        let mut ok: Vec<AppliedSlot> = Vec::new();
        let mut failed: Vec<SkippedTask> = Vec::new();

        for dest_plan in &plan.destinations {
            // 并发发布可能让规划时的计数失效，应用前重查容量
            let fresh_already = self
                .task_repo
                .count_published_between(
                    project_id,
                    dest_plan.social_account_id,
                    day_start,
                    day_end,
                )
                .await?;
            let capacity = (dest_plan.daily_limit as i64 - fresh_already).max(0);
            let mut applied_here = 0i64;

            for slot in &dest_plan.slots {
                if applied_here >= capacity {
                    failed.push(SkippedTask {
                        task_id: slot.task_id,
                        reason: REASON_DAILY_LIMIT.to_string(),
                    });
                    continue;
                }

                let task = match self.task_repo.get_by_id(slot.task_id).await? {
                    Some(t) => t,
                    None => {
                        failed.push(SkippedTask {
                            task_id: slot.task_id,
                            reason: "not_found".to_string(),
                        });
                        continue;
                    }
                };
                if task.is_terminal() {
                    failed.push(SkippedTask {
                        task_id: task.id,
                        reason: format!("invalid_status:{}", task.status),
                    });
                    continue;
                }
                if let Some(at) = task.scheduled_at {
                    if at.with_timezone(&tz).date_naive() == plan.date {
                        failed.push(SkippedTask {
                            task_id: task.id,
                            reason: REASON_ALREADY_SCHEDULED.to_string(),
                        });
                        continue;
                    }
                }

                match self
                    .lifecycle
                    .apply_slot(task.id, slot.priority, slot.time)
                    .await
                {
                    Ok(saved) => {
                        let mut entry = AppliedSlot {
                            task_id: saved.id,
                            priority: saved.priority,
                            scheduled_at: (saved.status == TaskStatus::ReadyForPublish)
                                .then_some(slot.time),
                            enqueued: None,
                        };
                        if enqueue
                            && matches!(saved.status, TaskStatus::Queued | TaskStatus::Error)
                        {
                            match self.lifecycle.enqueue(saved.id).await {
                                Ok(_) => entry.enqueued = Some(true),
                                Err(e) => {
                                    warn!("apply 时入队任务 {} 失败: {}", saved.id, e);
                                }
                            }
                        }
                        applied_here += 1;
                        ok.push(entry);
                    }
                    Err(e) => failed.push(SkippedTask {
                        task_id: task.id,
                        reason: e.bulk_reason(),
                    }),
                }
            }

            failed.extend(dest_plan.skipped.iter().cloned());
        }

        let record = DecisionRecord::new(
            Some(project_id),
            "publish_plan_apply",
            json!({
                "project_id": project_id,
                "date": plan.date.to_string(),
                "base_priority": input.project.publish.base_priority,
                "enqueue": enqueue,
                "ok_count": ok.len(),
                "failed_count": failed.len(),
                "task_ids": ok.iter().map(|e| e.task_id).collect::<Vec<_>>(),
            }),
        );
        if let Err(e) = self.decision_log.append(&record).await {
            warn!("写入计划应用决策日志失败: {}", e);
        }

        info!(
            "项目 {} 计划应用完成: 成功 {} 条, 失败 {} 条",
            project_id,
            ok.len(),
            failed.len()
        );

        Ok(ApplyOutcome {
            ok,
            failed,
            plan_summary: ApplySummary {
                date: plan.date,
                timezone: plan.timezone.clone(),
                destinations: plan.destinations.len(),
                assigned: plan.total_assigned(),
            },
        })
    }
}
