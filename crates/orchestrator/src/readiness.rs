//! done -> ready_for_publish 的就绪检查单
//!
//! 每项检查返回 `{check, ok, detail}`，任何一项失败时整个转移原子性
//! 失败并把完整清单交还调用方。

use publisher_core::CheckResult;
use publisher_domain::PublishTask;

pub trait ReadinessChecklist: Send + Sync {
    fn evaluate(&self, task: &PublishTask) -> Vec<CheckResult>;
}

/// 默认检查单
pub struct DefaultReadinessChecklist;

impl ReadinessChecklist for DefaultReadinessChecklist {
    fn evaluate(&self, task: &PublishTask) -> Vec<CheckResult> {
        let mut checks = Vec::with_capacity(4);

        let final_path = task.artifact_str("final_video_path");
        let ready_path = task.artifact_str("ready_video_path");
        if !final_path.is_empty() {
            checks.push(CheckResult::pass("final_artifact", final_path));
        } else if !ready_path.is_empty() {
            checks.push(CheckResult::pass("final_artifact", ready_path));
        } else {
            checks.push(CheckResult::fail(
                "final_artifact",
                "no final_video_path / ready_video_path in artifacts",
            ));
        }

        if task.has_publish_result() {
            checks.push(CheckResult::fail(
                "not_published",
                "task already carries a publish result",
            ));
        } else {
            checks.push(CheckResult::pass("not_published", "no publish result yet"));
        }

        let pending = task
            .artifacts
            .get("pending_moderation_steps")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        if pending > 0 {
            checks.push(CheckResult::fail(
                "no_pending_moderation",
                format!("{pending} moderation item(s) pending"),
            ));
        } else {
            checks.push(CheckResult::pass(
                "no_pending_moderation",
                "no pending moderation items",
            ));
        }

        if task.destination_account_id > 0 {
            checks.push(CheckResult::pass("destination_set", "destination bound"));
        } else {
            checks.push(CheckResult::fail(
                "destination_set",
                "no destination account bound",
            ));
        }

        checks
    }
}
