//! 外部协作方的端口
//!
//! 步骤执行器和平台发布适配器都是不透明的外部组件，编排器只观察
//! 启动/结束信号，不关心内部实现。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use publisher_core::PublisherResult;
use publisher_domain::PublishTask;

/// 检查点信号：执行器在步骤边界询问状态机是否继续
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Continue,
    Paused,
    Canceled,
}

/// 流水线整体结果，由执行器在结束时上报
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    Success { artifacts: serde_json::Value },
    Failure { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSuccess {
    pub url: String,
    pub external_id: Option<String>,
}

/// 步骤执行器端口
///
/// `dispatch` 返回外部作业句柄，之后执行器通过
/// `TaskLifecycle::begin_processing` / `checkpoint` / `executor_finished`
/// 反向驱动状态机。
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn dispatch(&self, task: &PublishTask) -> PublisherResult<String>;

    /// 尽力撤销尚未开始的作业，已在执行的作业由检查点协作停止
    async fn revoke(&self, job_id: &str) -> PublisherResult<()>;
}

/// 平台发布端口，鉴权与上传协议不在编排器范围内
#[async_trait]
pub trait PublishAdapter: Send + Sync {
    async fn publish(&self, task: &PublishTask) -> PublisherResult<PublishSuccess>;
}
