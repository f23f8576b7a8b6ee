use std::collections::BTreeMap;

use chrono::{DateTime, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// 发布任务状态
///
/// 封闭枚举加显式转移表：新增状态必须同时更新 `allowed_transitions`，
/// 不存在被悄悄接受的非法状态。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    ReadyForReview,
    Done,
    ReadyForPublish,
    Publishing,
    Published,
    Error,
    Paused,
    Canceled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::ReadyForReview => "ready_for_review",
            TaskStatus::Done => "done",
            TaskStatus::ReadyForPublish => "ready_for_publish",
            TaskStatus::Publishing => "publishing",
            TaskStatus::Published => "published",
            TaskStatus::Error => "error",
            TaskStatus::Paused => "paused",
            TaskStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "queued" => Some(TaskStatus::Queued),
            "processing" => Some(TaskStatus::Processing),
            "ready_for_review" => Some(TaskStatus::ReadyForReview),
            "done" => Some(TaskStatus::Done),
            "ready_for_publish" => Some(TaskStatus::ReadyForPublish),
            "publishing" => Some(TaskStatus::Publishing),
            "published" => Some(TaskStatus::Published),
            "error" => Some(TaskStatus::Error),
            "paused" => Some(TaskStatus::Paused),
            "canceled" => Some(TaskStatus::Canceled),
            _ => None,
        }
    }

    /// 终态任务仅保留用于审计，调度器和看门狗不再触碰
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Published | TaskStatus::Canceled)
    }

    /// 执行器正在占用的瞬态状态，暂停/取消只能在检查点生效
    pub fn is_executing(&self) -> bool {
        matches!(self, TaskStatus::Processing | TaskStatus::Publishing)
    }

    /// 状态转移表，状态机的唯一合法边集合
    pub fn allowed_transitions(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Queued => &[Processing, Done, Error, Paused, Canceled],
            // Queued 边是看门狗 requeue
            Processing => &[ReadyForReview, Done, Error, Paused, Canceled, Queued],
            ReadyForReview => &[Done, Error, Paused, Canceled],
            Done => &[ReadyForPublish, Error, Paused, Canceled],
            ReadyForPublish => &[Publishing, Done, Error, Paused, Canceled],
            Publishing => &[Published, Done, Error, Paused, Canceled, Queued],
            // 仅 force=true 的重试可以离开 Published
            Published => &[Publishing],
            Error => &[Queued, Publishing, Done, Paused, Canceled],
            Paused => &[Queued, Processing, ReadyForReview, Done, ReadyForPublish, Error, Canceled],
            Canceled => &[],
        }
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 项目审核模式，决定流水线成功后进入 done 还是 ready_for_review
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ModerationMode {
    Auto,
    Manual,
    StepByStep,
}

impl ModerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationMode::Auto => "auto",
            ModerationMode::Manual => "manual",
            ModerationMode::StepByStep => "step_by_step",
        }
    }

    pub fn skips_review(&self) -> bool {
        matches!(self, ModerationMode::Auto)
    }
}

/// 发布任务
///
/// 状态、时间戳、优先级只能经过状态机的转移函数修改，
/// 任何调用方不得直接写字段落库。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishTask {
    pub id: i64,
    pub project_id: i64,
    pub platform: String, // "youtube", "tiktok", "vk" 等
    pub destination_account_id: i64,
    pub status: TaskStatus,

    // 调度字段
    pub priority: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub candidate_id: Option<i64>,
    pub virality_score: Option<f64>, // 外部评分，这里只读

    // 控制标志：请求时间与生效时间分离，停止动作是异步协作式的
    pub pause_requested_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub paused_from: Option<TaskStatus>,
    pub cancel_requested_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,

    // 执行关联
    pub executor_job_id: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_finished_at: Option<DateTime<Utc>>,

    // 发布结果
    pub published_url: Option<String>,
    pub published_external_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub publish_error: Option<String>,
    pub error_message: Option<String>,
    pub metrics_snapshot: Option<serde_json::Value>,

    /// 执行器产出的产物清单（最终视频路径、话题签名等），编排器不解释内容
    pub artifacts: serde_json::Value,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishTask {
    pub fn new(project_id: i64, platform: String, destination_account_id: i64) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 将由数据库生成
            project_id,
            platform,
            destination_account_id,
            status: TaskStatus::Queued,
            priority: 0,
            scheduled_at: None,
            candidate_id: None,
            virality_score: None,
            pause_requested_at: None,
            paused_at: None,
            pause_reason: None,
            paused_from: None,
            cancel_requested_at: None,
            canceled_at: None,
            cancel_reason: None,
            executor_job_id: None,
            processing_started_at: None,
            processing_finished_at: None,
            published_url: None,
            published_external_id: None,
            published_at: None,
            publish_error: None,
            error_message: None,
            metrics_snapshot: None,
            artifacts: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_executing(&self) -> bool {
        self.status.is_executing()
    }

    pub fn has_publish_result(&self) -> bool {
        self.published_url.is_some() || self.published_external_id.is_some()
    }

    /// 从产物清单里取字符串字段，缺失返回空串
    pub fn artifact_str(&self, key: &str) -> &str {
        self.artifacts
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("")
    }

    /// 清空暂停/取消标志，重新入队时使用
    pub fn clear_control_flags(&mut self) {
        self.pause_requested_at = None;
        self.paused_at = None;
        self.pause_reason = None;
        self.paused_from = None;
        self.cancel_requested_at = None;
        self.canceled_at = None;
        self.cancel_reason = None;
    }

    pub fn entity_description(&self) -> String {
        format!(
            "发布任务 (ID: {}, 项目: {}, 平台: {}, 状态: {})",
            self.id, self.project_id, self.platform, self.status
        )
    }
}

pub const DAY_ABBREV: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

pub fn day_key(weekday: Weekday) -> &'static str {
    DAY_ABBREV[weekday.num_days_from_monday() as usize]
}

/// 一天内的发布时间窗，本地时钟时间，含头不含尾
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Window {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// 项目级发布设置（时区、时间窗、间隔、容量）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSettings {
    pub timezone: Tz,
    /// 按星期几（"mon".."sun"）给出的时间窗列表
    pub windows: BTreeMap<String, Vec<Window>>,
    pub min_gap_minutes: i64,
    pub daily_limit_per_destination: i32,
    pub jitter_minutes: i64,
    pub base_priority: i32,
}

impl Default for PublishSettings {
    fn default() -> Self {
        let all_day = vec![Window {
            start: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(23, 59, 0).unwrap(),
        }];
        let windows = DAY_ABBREV
            .iter()
            .map(|d| (d.to_string(), all_day.clone()))
            .collect();
        Self {
            timezone: chrono_tz::UTC,
            windows,
            min_gap_minutes: 90,
            daily_limit_per_destination: 3,
            jitter_minutes: 0,
            base_priority: 10,
        }
    }
}

impl PublishSettings {
    pub fn windows_for(&self, weekday: Weekday) -> &[Window] {
        self.windows
            .get(day_key(weekday))
            .map(|w| w.as_slice())
            .unwrap_or(&[])
    }
}

/// 项目配置，编排器只读
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: i64,
    pub name: String,
    pub moderation_mode: ModerationMode,
    pub publish: PublishSettings,
}

/// 发布目的地：(平台, 账号) 组合及其容量策略，项目配置所有
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub id: i64,
    pub project_id: i64,
    pub platform: String,
    pub social_account_id: i64,
    pub daily_limit: i32,
    pub priority: i32,
    pub is_active: bool,
}

/// 决策日志条目，滚动保留用于可观测性，不参与控制流
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: i64,
    pub project_id: Option<i64>,
    pub action: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn new(project_id: Option<i64>, action: &str, payload: serde_json::Value) -> Self {
        Self {
            id: 0,
            project_id,
            action: action.to_string(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// 任务查询过滤器
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub project_id: Option<i64>,
    pub destination_account_id: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
