//! 命令行工具封装
//!
//! 流水线步骤与平台发布都以外部命令建模：模板里的 `{task_id}` 替换
//! 为任务 ID，步骤命令的 stdout 若是 JSON 对象则合并进产物清单，
//! 发布命令的 stdout 按 `{url, external_id}` 解析。

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use publisher_core::{ExecutorConfig, PipelineStepConfig, PublisherError, PublisherResult};
use publisher_domain::PublishTask;
use publisher_orchestrator::{PublishAdapter, PublishSuccess};

use crate::executor::PipelineRunner;

fn render(template: &str, task: &PublishTask) -> String {
    template.replace("{task_id}", &task.id.to_string())
}

async fn run_command(command: &str) -> PublisherResult<String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|e| PublisherError::Executor(format!("启动命令失败: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PublisherError::Executor(format!(
            "命令退出码 {:?}: {}",
            output.status.code(),
            stderr.trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// 按配置的命令模板依次执行流水线步骤
pub struct CommandPipelineRunner {
    steps: Vec<PipelineStepConfig>,
}

impl CommandPipelineRunner {
    pub fn new(steps: Vec<PipelineStepConfig>) -> Self {
        Self { steps }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(config.pipeline_steps.clone())
    }
}

#[async_trait]
impl PipelineRunner for CommandPipelineRunner {
    fn step_names(&self, _task: &PublishTask) -> Vec<String> {
        self.steps.iter().map(|s| s.name.clone()).collect()
    }

    async fn run_step(
        &self,
        task: &PublishTask,
        step_index: usize,
        artifacts: &mut serde_json::Value,
    ) -> PublisherResult<()> {
        let step = self
            .steps
            .get(step_index)
            .ok_or_else(|| PublisherError::Executor(format!("未知步骤下标 {step_index}")))?;
        let command = render(&step.command, task);
        debug!("任务 {} 步骤 {} 执行: {}", task.id, step.name, command);

        let stdout = run_command(&command).await?;

        // 工具以 stdout JSON 对象上报产物
        if let Ok(serde_json::Value::Object(produced)) =
            serde_json::from_str::<serde_json::Value>(stdout.trim())
        {
            if !artifacts.is_object() {
                *artifacts = serde_json::Value::Object(serde_json::Map::new());
            }
            if let serde_json::Value::Object(map) = artifacts {
                for (key, value) in produced {
                    map.insert(key, value);
                }
            }
        }
        Ok(())
    }
}

/// 把平台上传委托给外部命令的发布适配器
pub struct CommandPublishAdapter {
    command: String,
}

impl CommandPublishAdapter {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PublishAdapter for CommandPublishAdapter {
    async fn publish(&self, task: &PublishTask) -> PublisherResult<PublishSuccess> {
        let command = render(&self.command, task);
        let stdout = run_command(&command).await?;

        let value: serde_json::Value = serde_json::from_str(stdout.trim()).map_err(|e| {
            PublisherError::Executor(format!("发布命令输出不是合法 JSON: {e}"))
        })?;
        let url = value
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PublisherError::Executor("发布命令输出缺少 url".to_string()))?
            .to_string();
        let external_id = value
            .get("external_id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(PublishSuccess { url, external_id })
    }
}

/// 未配置发布命令时的适配器：每次尝试都以明确的错误失败，
/// 错误照常写进任务而不是悄悄吞掉
pub struct UnconfiguredPublishAdapter;

#[async_trait]
impl PublishAdapter for UnconfiguredPublishAdapter {
    async fn publish(&self, task: &PublishTask) -> PublisherResult<PublishSuccess> {
        Err(PublisherError::Executor(format!(
            "publish_command 未配置，无法发布任务 {}",
            task.id
        )))
    }
}
