//! 任务状态机
//!
//! 状态转移及其副作用（时间戳、错误信息、审核门控）的唯一入口。
//! 所有写入都走 `TaskRepository::update_guarded` 的比较交换：看门狗、
//! 规划器 apply 和手工操作并发作用于同一任务时，输家得到 Conflict，
//! 不会出现双写。

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, warn};

use publisher_core::{CheckResult, PublisherError, PublisherResult};
use publisher_domain::{
    DecisionLogRepository, DecisionRecord, ModerationMode, ProjectRepository, PublishTask,
    TaskRepository, TaskStatus,
};

use crate::executor::{ControlSignal, ExecutionOutcome, PublishAdapter, StepExecutor};
use crate::readiness::ReadinessChecklist;

fn clamp_priority(priority: i32) -> i32 {
    priority.clamp(-10, 10)
}

pub struct TaskLifecycle {
    task_repo: Arc<dyn TaskRepository>,
    project_repo: Arc<dyn ProjectRepository>,
    decision_log: Arc<dyn DecisionLogRepository>,
    executor: Arc<dyn StepExecutor>,
    publish_adapter: Arc<dyn PublishAdapter>,
    checklist: Arc<dyn ReadinessChecklist>,
}

impl TaskLifecycle {
    pub fn new(
        task_repo: Arc<dyn TaskRepository>,
        project_repo: Arc<dyn ProjectRepository>,
        decision_log: Arc<dyn DecisionLogRepository>,
        executor: Arc<dyn StepExecutor>,
        publish_adapter: Arc<dyn PublishAdapter>,
        checklist: Arc<dyn ReadinessChecklist>,
    ) -> Self {
        Self {
            task_repo,
            project_repo,
            decision_log,
            executor,
            publish_adapter,
            checklist,
        }
    }

    async fn load(&self, id: i64) -> PublisherResult<PublishTask> {
        self.task_repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| PublisherError::task_not_found(id))
    }

    /// 只读取任务，执行器在派发回调里用
    pub async fn task(&self, id: i64) -> PublisherResult<PublishTask> {
        self.load(id).await
    }

    /// 带转移表校验的保存：from -> to 不在表里直接拒绝
    async fn save_transition(
        &self,
        current: &PublishTask,
        mut next: PublishTask,
        operation: &str,
    ) -> PublisherResult<PublishTask> {
        if next.status != current.status && !current.status.can_transition_to(next.status) {
            return Err(PublisherError::precondition(
                current.status.as_str(),
                operation,
            ));
        }
        next.updated_at = Utc::now();
        self.task_repo
            .update_guarded(&next, current.status, current.updated_at)
            .await
    }

    /// 执行器句柄是尽力而为的附注，竞争失败只记日志
    async fn store_job_id(&self, task: PublishTask, job_id: String) -> PublishTask {
        let mut next = task.clone();
        next.executor_job_id = Some(job_id);
        next.updated_at = Utc::now();
        match self
            .task_repo
            .update_guarded(&next, task.status, task.updated_at)
            .await
        {
            Ok(saved) => saved,
            Err(e) => {
                debug!("任务 {} 记录执行器句柄失败（可能已被执行器更新）: {}", task.id, e);
                task
            }
        }
    }

    /// 派发执行器；失败时把任务落到 error 而不是留在瞬态状态等看门狗
    async fn dispatch_and_record(&self, saved: PublishTask) -> PublisherResult<PublishTask> {
        match self.executor.dispatch(&saved).await {
            Ok(job_id) => Ok(self.store_job_id(saved, job_id).await),
            Err(e) => {
                let mut failed = saved.clone();
                failed.status = TaskStatus::Error;
                failed.error_message = Some(format!("dispatch failed: {e}"));
                if let Err(save_err) = self
                    .save_transition(&saved, failed, "dispatch_failed")
                    .await
                {
                    warn!("任务 {} 派发失败后落盘错误状态也失败: {}", saved.id, save_err);
                }
                Err(e)
            }
        }
    }

    async fn log_decision(&self, project_id: Option<i64>, action: &str, payload: serde_json::Value) {
        let record = DecisionRecord::new(project_id, action, payload);
        if let Err(e) = self.decision_log.append(&record).await {
            warn!("写入决策日志失败: {}", e);
        }
    }

    // ── 执行触发 ────────────────────────────────────────────

    /// queued -> processing，并立即委派给步骤执行器
    pub async fn process(&self, id: i64) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.status != TaskStatus::Queued {
            return Err(PublisherError::precondition(task.status.as_str(), "process"));
        }

        let mut next = task.clone();
        next.status = TaskStatus::Processing;
        next.error_message = None;
        next.processing_started_at = Some(Utc::now());
        next.processing_finished_at = None;
        let saved = self.save_transition(&task, next, "process").await?;
        let saved = self.dispatch_and_record(saved).await?;

        info!("任务 {} 开始处理", id);
        Ok(saved)
    }

    /// 重新入队：重置为 queued、清空错误与控制标志，再派发执行器
    ///
    /// error 状态的任务由此路径重试
    pub async fn enqueue(&self, id: i64) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if !matches!(task.status, TaskStatus::Queued | TaskStatus::Error) {
            return Err(PublisherError::precondition(task.status.as_str(), "enqueue"));
        }

        let mut next = task.clone();
        next.status = TaskStatus::Queued;
        next.error_message = None;
        next.publish_error = None;
        // scheduled_at 只在 ready_for_publish 及之后有意义
        next.scheduled_at = None;
        next.clear_control_flags();
        let saved = self.save_transition(&task, next, "enqueue").await?;
        let saved = self.dispatch_and_record(saved).await?;

        info!("任务 {} 已重新入队", id);
        Ok(saved)
    }

    /// 执行器取走排队任务时调用：queued -> processing
    pub async fn begin_processing(&self, id: i64) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.status != TaskStatus::Queued {
            return Err(PublisherError::precondition(
                task.status.as_str(),
                "begin_processing",
            ));
        }
        let mut next = task.clone();
        next.status = TaskStatus::Processing;
        next.error_message = None;
        next.processing_started_at = Some(Utc::now());
        next.processing_finished_at = None;
        self.save_transition(&task, next, "begin_processing").await
    }

    /// 执行器完成信号：processing -> ready_for_review | done | error
    ///
    /// 成功时由项目审核模式决定是否跳过 ready_for_review。
    pub async fn executor_finished(
        &self,
        id: i64,
        outcome: ExecutionOutcome,
    ) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.status != TaskStatus::Processing {
            return Err(PublisherError::precondition(
                task.status.as_str(),
                "executor_finished",
            ));
        }

        let mut next = task.clone();
        next.executor_job_id = None;
        next.processing_finished_at = Some(Utc::now());

        match outcome {
            ExecutionOutcome::Success { artifacts } => {
                let mode = self
                    .project_repo
                    .get_by_id(task.project_id)
                    .await?
                    .map(|p| p.moderation_mode)
                    .unwrap_or(ModerationMode::Manual);
                next.status = if mode.skips_review() {
                    TaskStatus::Done
                } else {
                    TaskStatus::ReadyForReview
                };
                if !artifacts.is_null() {
                    next.artifacts = artifacts;
                }
                info!("任务 {} 流水线完成，进入 {}", id, next.status);
            }
            ExecutionOutcome::Failure { error } => {
                next.status = TaskStatus::Error;
                next.error_message = Some(error.clone());
                warn!("任务 {} 流水线失败: {}", id, error);
            }
        }

        self.save_transition(&task, next, "executor_finished").await
    }

    // ── 审核 ────────────────────────────────────────────────

    /// 审核通过：ready_for_review -> done
    pub async fn approve(&self, id: i64) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.status != TaskStatus::ReadyForReview {
            return Err(PublisherError::precondition(task.status.as_str(), "approve"));
        }
        let mut next = task.clone();
        next.status = TaskStatus::Done;
        self.save_transition(&task, next, "approve").await
    }

    /// 审核拒绝：ready_for_review -> error
    pub async fn reject(&self, id: i64, reason: Option<String>) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.status != TaskStatus::ReadyForReview {
            return Err(PublisherError::precondition(task.status.as_str(), "reject"));
        }
        let mut next = task.clone();
        next.status = TaskStatus::Error;
        next.error_message = Some(reason.unwrap_or_else(|| "rejected by moderation".to_string()));
        self.save_transition(&task, next, "reject").await
    }

    /// done -> ready_for_publish，就绪检查单全部通过才放行
    ///
    /// 对已是 ready_for_publish 的任务重复调用会确定性地失败，
    /// 不会产生二次排期。
    pub async fn mark_ready_for_publish(
        &self,
        id: i64,
    ) -> PublisherResult<(PublishTask, Vec<CheckResult>)> {
        let task = self.load(id).await?;
        if task.status != TaskStatus::Done {
            return Err(PublisherError::precondition(
                task.status.as_str(),
                "mark_ready_for_publish",
            ));
        }

        let checks = self.checklist.evaluate(&task);
        if checks.iter().any(|c| !c.ok) {
            return Err(PublisherError::ChecklistFailed { checks });
        }

        let mut next = task.clone();
        next.status = TaskStatus::ReadyForPublish;
        let saved = self
            .save_transition(&task, next, "mark_ready_for_publish")
            .await?;
        info!("任务 {} 通过就绪检查，等待排期", id);
        Ok((saved, checks))
    }

    // ── 发布 ────────────────────────────────────────────────

    /// 发布尝试：ready_for_publish -> publishing -> published | error
    ///
    /// 已发布的任务必须带 force=true 才能重试，成功会覆盖旧的发布结果。
    pub async fn attempt_publish(&self, id: i64, force: bool) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;

        match task.status {
            TaskStatus::Published if !force => {
                return Err(PublisherError::AlreadyPublished { id });
            }
            TaskStatus::Published | TaskStatus::ReadyForPublish | TaskStatus::Error => {}
            other => {
                return Err(PublisherError::precondition(other.as_str(), "retry_publish"));
            }
        }

        let mut next = task.clone();
        next.status = TaskStatus::Publishing;
        next.publish_error = None;
        let publishing = self.save_transition(&task, next, "retry_publish").await?;

        match self.publish_adapter.publish(&publishing).await {
            Ok(success) => {
                let mut done = publishing.clone();
                done.status = TaskStatus::Published;
                done.published_url = Some(success.url);
                done.published_external_id = success.external_id;
                done.published_at = Some(Utc::now());
                done.publish_error = None;
                done.error_message = None;
                let saved = self.save_transition(&publishing, done, "publish_finished").await?;
                info!("任务 {} 发布成功: {:?}", id, saved.published_url);
                Ok(saved)
            }
            Err(e) => {
                // 执行错误只存储、不解释
                let message = e.to_string();
                let mut failed = publishing.clone();
                failed.status = TaskStatus::Error;
                failed.publish_error = Some(message.clone());
                failed.error_message = Some(message.clone());
                let saved = self.save_transition(&publishing, failed, "publish_failed").await?;
                warn!("任务 {} 发布失败: {}", id, message);
                Ok(saved)
            }
        }
    }

    // ── 暂停 / 恢复 / 取消 ──────────────────────────────────

    /// 请求暂停：立即打标志；非执行中的任务在当下这个安全点直接暂停，
    /// 执行中的任务等执行器在步骤边界确认。
    pub async fn request_pause(
        &self,
        id: i64,
        reason: Option<String>,
    ) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.is_terminal() || task.status == TaskStatus::Paused {
            return Err(PublisherError::precondition(task.status.as_str(), "pause"));
        }

        let now = Utc::now();
        let mut next = task.clone();
        next.pause_requested_at = Some(now);
        next.pause_reason = reason;

        if task.status == TaskStatus::Queued {
            if let Some(job_id) = &task.executor_job_id {
                if let Err(e) = self.executor.revoke(job_id).await {
                    warn!("撤销任务 {} 的排队作业失败: {}", id, e);
                }
            }
        }

        if !task.is_executing() {
            next.status = TaskStatus::Paused;
            next.paused_at = Some(now);
            next.paused_from = Some(resume_target(task.status));
            if task.status == TaskStatus::ReadyForPublish {
                // 暂停期间不保留排期，恢复后由规划器重新分配槽位
                next.scheduled_at = None;
            }
            let saved = self.save_transition(&task, next, "pause").await?;
            info!("任务 {} 已暂停", id);
            return Ok(saved);
        }

        let saved = self.save_transition(&task, next, "pause").await?;
        info!("任务 {} 暂停已请求，等待执行器在检查点确认", id);
        Ok(saved)
    }

    /// 恢复：paused -> 暂停前的状态，清空两个暂停字段
    pub async fn resume(&self, id: i64) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.status != TaskStatus::Paused {
            return Err(PublisherError::precondition(task.status.as_str(), "resume"));
        }

        let target = task.paused_from.unwrap_or(TaskStatus::Queued);
        let mut next = task.clone();
        next.status = target;
        next.pause_requested_at = None;
        next.paused_at = None;
        next.pause_reason = None;
        next.paused_from = None;
        let saved = self.save_transition(&task, next, "resume").await?;

        // 回到待执行状态的任务重新派发
        let saved = if matches!(target, TaskStatus::Queued | TaskStatus::Processing) {
            self.dispatch_and_record(saved).await?
        } else {
            saved
        };

        info!("任务 {} 已恢复为 {}", id, target);
        Ok(saved)
    }

    /// 请求取消：标志立即生效；执行中的任务等检查点确认，
    /// 其余任务当场进入 canceled。
    pub async fn request_cancel(
        &self,
        id: i64,
        reason: Option<String>,
    ) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.is_terminal() {
            return Err(PublisherError::precondition(task.status.as_str(), "cancel"));
        }

        let now = Utc::now();
        let mut next = task.clone();
        next.cancel_requested_at = Some(now);
        next.cancel_reason = reason;

        if task.status == TaskStatus::Queued {
            if let Some(job_id) = &task.executor_job_id {
                if let Err(e) = self.executor.revoke(job_id).await {
                    warn!("撤销任务 {} 的排队作业失败: {}", id, e);
                }
            }
        }

        if !task.is_executing() {
            next.status = TaskStatus::Canceled;
            next.canceled_at = Some(now);
            next.executor_job_id = None;
            let saved = self.save_transition(&task, next, "cancel").await?;
            info!("任务 {} 已取消", id);
            return Ok(saved);
        }

        let saved = self.save_transition(&task, next, "cancel").await?;
        info!("任务 {} 取消已请求，等待执行器在检查点确认", id);
        Ok(saved)
    }

    /// 执行器在步骤边界调用的检查点，取消优先于暂停
    pub async fn checkpoint(&self, id: i64) -> PublisherResult<ControlSignal> {
        let task = self.load(id).await?;
        if !task.is_executing() {
            // 状态已被并发路径改写，执行器应停止当前作业
            return Ok(ControlSignal::Canceled);
        }

        if task.cancel_requested_at.is_some() {
            let mut next = task.clone();
            next.status = TaskStatus::Canceled;
            next.canceled_at = Some(Utc::now());
            next.executor_job_id = None;
            self.save_transition(&task, next, "cancel_checkpoint").await?;
            info!("任务 {} 在检查点确认取消", id);
            return Ok(ControlSignal::Canceled);
        }

        if task.pause_requested_at.is_some() {
            let mut next = task.clone();
            next.status = TaskStatus::Paused;
            next.paused_at = Some(Utc::now());
            next.paused_from = Some(resume_target(task.status));
            next.executor_job_id = None;
            next.scheduled_at = None;
            self.save_transition(&task, next, "pause_checkpoint").await?;
            info!("任务 {} 在检查点确认暂停", id);
            return Ok(ControlSignal::Paused);
        }

        Ok(ControlSignal::Continue)
    }

    // ── 运维操作 ────────────────────────────────────────────

    /// 操作员强制改状态（审核 UI 使用），绕过执行器但仍走转移函数
    pub async fn force_status(
        &self,
        id: i64,
        target: TaskStatus,
        error_text: Option<String>,
    ) -> PublisherResult<PublishTask> {
        if !matches!(target, TaskStatus::Done | TaskStatus::Error) {
            return Err(PublisherError::validation(format!(
                "状态覆盖仅允许 done / error，收到 {target}"
            )));
        }
        let task = self.load(id).await?;
        if task.is_terminal() {
            return Err(PublisherError::precondition(task.status.as_str(), "override"));
        }

        let mut next = task.clone();
        next.status = target;
        next.executor_job_id = None;
        match target {
            TaskStatus::Error => {
                next.error_message =
                    Some(error_text.unwrap_or_else(|| "manual override".to_string()));
            }
            _ => {
                next.error_message = None;
            }
        }
        let saved = self.save_transition(&task, next, "override").await?;

        self.log_decision(
            Some(task.project_id),
            "manual_override",
            json!({
                "task_id": id,
                "old_status": task.status.as_str(),
                "new_status": target.as_str(),
            }),
        )
        .await;

        info!("任务 {} 被操作员覆盖为 {}", id, target);
        Ok(saved)
    }

    /// 优先级写入：非终态任务允许的直接字段更新，仍走守卫写路径
    pub async fn set_priority(&self, id: i64, priority: i32) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.is_terminal() {
            return Err(PublisherError::precondition(
                task.status.as_str(),
                "set_priority",
            ));
        }
        let mut next = task.clone();
        next.priority = clamp_priority(priority);
        self.save_transition(&task, next, "set_priority").await
    }

    /// 规划器 apply 的槽位写入：优先级 + （仅 ready_for_publish）排期时间
    pub async fn apply_slot(
        &self,
        id: i64,
        priority: i32,
        scheduled_at: chrono::DateTime<Utc>,
    ) -> PublisherResult<PublishTask> {
        let task = self.load(id).await?;
        if task.is_terminal() {
            return Err(PublisherError::precondition(
                task.status.as_str(),
                "apply_slot",
            ));
        }
        let mut next = task.clone();
        next.priority = clamp_priority(priority);
        if task.status == TaskStatus::ReadyForPublish {
            next.scheduled_at = Some(scheduled_at);
        }
        self.save_transition(&task, next, "apply_slot").await
    }

    // ── 看门狗恢复 ──────────────────────────────────────────

    /// 卡死任务重新入队，基于看门狗持有的快照做比较交换
    pub async fn watchdog_requeue(&self, snapshot: &PublishTask) -> PublisherResult<PublishTask> {
        if !snapshot.is_executing() {
            return Err(PublisherError::precondition(
                snapshot.status.as_str(),
                "watchdog_requeue",
            ));
        }
        if let Some(job_id) = &snapshot.executor_job_id {
            if let Err(e) = self.executor.revoke(job_id).await {
                debug!("撤销卡死任务 {} 的作业失败: {}", snapshot.id, e);
            }
        }
        let mut next = snapshot.clone();
        next.status = TaskStatus::Queued;
        next.executor_job_id = None;
        next.scheduled_at = None;
        self.save_transition(snapshot, next, "watchdog_requeue").await
    }

    /// 卡死任务标记为错误，合成信息写进任务
    pub async fn watchdog_mark_error(
        &self,
        snapshot: &PublishTask,
        message: &str,
    ) -> PublisherResult<PublishTask> {
        if !snapshot.is_executing() {
            return Err(PublisherError::precondition(
                snapshot.status.as_str(),
                "watchdog_mark_error",
            ));
        }
        let mut next = snapshot.clone();
        next.status = TaskStatus::Error;
        next.error_message = Some(message.to_string());
        if snapshot.status == TaskStatus::Publishing {
            next.publish_error = Some(message.to_string());
        }
        next.executor_job_id = None;
        self.save_transition(snapshot, next, "watchdog_mark_error")
            .await
    }
}

/// 暂停生效时记录的恢复目标
///
/// processing 恢复后重新派发流水线；publishing 回到 ready_for_publish
/// 由调度循环重新尝试，不会留下无人认领的 publishing 状态。
fn resume_target(status: TaskStatus) -> TaskStatus {
    match status {
        TaskStatus::Publishing => TaskStatus::ReadyForPublish,
        other => other,
    }
}
