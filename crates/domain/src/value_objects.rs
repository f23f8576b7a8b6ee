use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{TaskStatus, Window};
pub use publisher_core::CheckResult;

/// 规划器输出的单个时间槽，不单独持久化
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slot {
    pub time: DateTime<Utc>,
    pub task_id: i64,
    pub candidate_id: Option<i64>,
    pub score: f64,
    pub effective_score: f64,
    /// apply 时建议回写到任务上的优先级，槽位越早优先级越高
    pub priority: i32,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedTask {
    pub task_id: i64,
    pub reason: String,
}

/// 单个目的地的规划结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestPlan {
    pub destination_id: i64,
    pub social_account_id: i64,
    pub platform: String,
    pub already_published_today: i64,
    pub daily_limit: i32,
    pub total_slots: usize,
    pub slots: Vec<Slot>,
    pub skipped: Vec<SkippedTask>,
}

/// 纯函数输出的发布计划，只有 apply 才会改动任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub project_id: i64,
    pub date: NaiveDate,
    pub timezone: String,
    pub day: String,
    pub windows: Vec<Window>,
    pub min_gap_minutes: i64,
    pub destinations: Vec<DestPlan>,
}

impl Plan {
    pub fn total_assigned(&self) -> usize {
        self.destinations.iter().map(|d| d.slots.len()).sum()
    }
}

/// 每目的地的近期发布历史快照，用于有效分惩罚
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    pub last_topic_signature: String,
    pub last_author_key: String,
    pub recent_topic_signatures: HashSet<String>,
    pub recent_author_keys: HashSet<String>,
}

/// 排序后的任务及其评分拆解
#[derive(Debug, Clone)]
pub struct ScoredTask {
    pub task_id: i64,
    pub base_score: f64,
    pub effective_score: f64,
    pub penalties: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogAction {
    Requeued,
    MarkedError,
    WouldRequeue,
    WouldMarkError,
    /// 输给了并发的手工操作，本轮跳过
    Conflict,
}

impl WatchdogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchdogAction::Requeued => "requeued",
            WatchdogAction::MarkedError => "marked_error",
            WatchdogAction::WouldRequeue => "would_requeue",
            WatchdogAction::WouldMarkError => "would_mark_error",
            WatchdogAction::Conflict => "conflict",
        }
    }
}

/// 看门狗对单个卡死任务的裁决
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogItem {
    pub task_id: i64,
    pub project_id: i64,
    pub old_status: TaskStatus,
    pub age_minutes: i64,
    pub action: WatchdogAction,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogThresholds {
    pub stuck_processing_minutes: i64,
    pub stuck_publishing_minutes: i64,
    pub auto_requeue: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogReport {
    pub stuck_count: usize,
    pub stuck_processing: usize,
    pub stuck_publishing: usize,
    pub items: Vec<WatchdogItem>,
    pub dry_run: bool,
    pub run_at: DateTime<Utc>,
    pub thresholds: WatchdogThresholds,
}

/// 批量操作的按条目结果，单条失败不会中断批次
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub ok: Vec<i64>,
    pub failed: Vec<BulkFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkFailure {
    pub id: i64,
    pub reason: String,
}

/// plan apply 的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub ok: Vec<AppliedSlot>,
    pub failed: Vec<SkippedTask>,
    pub plan_summary: ApplySummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedSlot {
    pub task_id: i64,
    pub priority: i32,
    /// 仅当任务在写入时仍处于 ready_for_publish 才会带上排期时间
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enqueued: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplySummary {
    pub date: NaiveDate,
    pub timezone: String,
    pub destinations: usize,
    pub assigned: usize,
}

/// /api/ops/health 的系统概览
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthOverview {
    pub counts: BTreeMap<String, i64>,
    pub stuck: StuckCounts,
    pub scheduler_enabled: bool,
    pub watchdog_enabled: bool,
    pub last_decisions: Vec<DecisionSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StuckCounts {
    pub processing: i64,
    pub publishing: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub action: String,
    pub at: DateTime<Utc>,
}
