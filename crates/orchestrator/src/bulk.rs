//! 批量派发器
//!
//! 对一组任务 ID 应用同一操作，逐条经过状态机，单条失败不会中断
//! 批次，结果按 {ok, failed} 分区返回。UI 批量操作和规划器 apply
//! 都依赖这个"尽力而为、按条目返回"的契约。

use std::sync::Arc;

use tracing::info;

use publisher_domain::{BulkFailure, BulkOutcome};

use crate::lifecycle::TaskLifecycle;

#[derive(Debug, Clone)]
pub enum BulkOperation {
    Enqueue,
    Pause { reason: Option<String> },
    Resume,
    Cancel { reason: Option<String> },
    SetPriority(i32),
}

impl BulkOperation {
    pub fn name(&self) -> &'static str {
        match self {
            BulkOperation::Enqueue => "enqueue",
            BulkOperation::Pause { .. } => "pause",
            BulkOperation::Resume => "resume",
            BulkOperation::Cancel { .. } => "cancel",
            BulkOperation::SetPriority(_) => "set_priority",
        }
    }
}

pub struct BulkDispatcher {
    lifecycle: Arc<TaskLifecycle>,
}

impl BulkDispatcher {
    pub fn new(lifecycle: Arc<TaskLifecycle>) -> Self {
        Self { lifecycle }
    }

    /// 完成的条目保持完成，没有部分回滚
    pub async fn apply(&self, operation: &BulkOperation, ids: &[i64]) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();

        for &id in ids {
            let result = match operation {
                BulkOperation::Enqueue => self.lifecycle.enqueue(id).await,
                BulkOperation::Pause { reason } => {
                    self.lifecycle.request_pause(id, reason.clone()).await
                }
                BulkOperation::Resume => self.lifecycle.resume(id).await,
                BulkOperation::Cancel { reason } => {
                    self.lifecycle.request_cancel(id, reason.clone()).await
                }
                BulkOperation::SetPriority(priority) => {
                    self.lifecycle.set_priority(id, *priority).await
                }
            };

            match result {
                Ok(_) => outcome.ok.push(id),
                Err(e) => outcome.failed.push(BulkFailure {
                    id,
                    reason: e.bulk_reason(),
                }),
            }
        }

        info!(
            "批量 {} 完成: 成功 {} 条, 失败 {} 条",
            operation.name(),
            outcome.ok.len(),
            outcome.failed.len()
        );

        outcome
    }
}
