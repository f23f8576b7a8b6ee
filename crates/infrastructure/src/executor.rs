//! 进程内步骤执行器
//!
//! 信号量限宽的工作池，逐步运行流水线，在每个步骤边界调用状态机的
//! 检查点实现协作式暂停/取消。流水线步骤本身是不透明工具，由
//! `PipelineRunner` 提供。

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::{PublishTask, TaskStatus};
use publisher_orchestrator::{ControlSignal, ExecutionOutcome, StepExecutor, TaskLifecycle};

/// 流水线步骤提供方：编排器不关心步骤做什么，只关心成功与否和产物
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    fn step_names(&self, task: &PublishTask) -> Vec<String>;

    /// 运行单个步骤，可向 artifacts 合并产出
    async fn run_step(
        &self,
        task: &PublishTask,
        step_index: usize,
        artifacts: &mut serde_json::Value,
    ) -> PublisherResult<()>;
}

/// 信号量限宽的工作池执行器
#[derive(Clone)]
pub struct WorkerPoolExecutor {
    semaphore: Arc<Semaphore>,
    runner: Arc<dyn PipelineRunner>,
    lifecycle: Arc<OnceLock<Arc<TaskLifecycle>>>,
    revoked: Arc<Mutex<HashSet<String>>>,
}

impl WorkerPoolExecutor {
    pub fn new(runner: Arc<dyn PipelineRunner>, max_concurrent_tasks: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            runner,
            lifecycle: Arc::new(OnceLock::new()),
            revoked: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// 装配期绑定状态机，打破执行器与状态机的构造环
    pub fn bind_lifecycle(&self, lifecycle: Arc<TaskLifecycle>) {
        if self.lifecycle.set(lifecycle).is_err() {
            warn!("执行器重复绑定状态机，忽略");
        }
    }

    fn is_revoked(&self, job_id: &str) -> bool {
        self.revoked.lock().unwrap().contains(job_id)
    }

    async fn run_job(self, task_id: i64, job_id: String) {
        let Some(lifecycle) = self.lifecycle.get().cloned() else {
            warn!("执行器未绑定状态机，丢弃作业 {}", job_id);
            return;
        };

        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };
        if self.is_revoked(&job_id) {
            debug!("作业 {} 已撤销，跳过", job_id);
            return;
        }

        // process 路径下任务已是 processing，排队路径在这里取走
        let task = match lifecycle.begin_processing(task_id).await {
            Ok(task) => task,
            Err(_) => match lifecycle.task(task_id).await {
                Ok(task) if task.status == TaskStatus::Processing => task,
                Ok(task) => {
                    debug!(
                        "任务 {} 当前状态 {}，作业 {} 不再执行",
                        task_id, task.status, job_id
                    );
                    return;
                }
                Err(e) => {
                    warn!("执行器读取任务 {} 失败: {}", task_id, e);
                    return;
                }
            },
        };

        let steps = self.runner.step_names(&task);
        let mut artifacts = task.artifacts.clone();

        for (index, name) in steps.iter().enumerate() {
            if self.is_revoked(&job_id) {
                debug!("作业 {} 在步骤 {} 前被撤销", job_id, name);
                return;
            }
            match lifecycle.checkpoint(task_id).await {
                Ok(ControlSignal::Continue) => {}
                Ok(signal) => {
                    info!("任务 {} 在步骤 {} 前收到 {:?}，停止执行", task_id, name, signal);
                    return;
                }
                Err(e) => {
                    warn!("任务 {} 检查点失败: {}", task_id, e);
                    return;
                }
            }

            if let Err(e) = self.runner.run_step(&task, index, &mut artifacts).await {
                let _ = lifecycle
                    .executor_finished(
                        task_id,
                        ExecutionOutcome::Failure {
                            error: format!("step {name} failed: {e}"),
                        },
                    )
                    .await;
                return;
            }
        }

        if let Err(e) = lifecycle
            .executor_finished(task_id, ExecutionOutcome::Success { artifacts })
            .await
        {
            warn!("任务 {} 上报完成信号失败: {}", task_id, e);
        }
    }
}

#[async_trait]
impl StepExecutor for WorkerPoolExecutor {
    async fn dispatch(&self, task: &PublishTask) -> PublisherResult<String> {
        if self.lifecycle.get().is_none() {
            return Err(PublisherError::Executor(
                "执行器尚未绑定状态机".to_string(),
            ));
        }
        let job_id = Uuid::new_v4().to_string();
        let this = self.clone();
        let task_id = task.id;
        let job = job_id.clone();
        tokio::spawn(async move {
            this.run_job(task_id, job).await;
        });
        debug!("任务 {} 派发为作业 {}", task.id, job_id);
        Ok(job_id)
    }

    async fn revoke(&self, job_id: &str) -> PublisherResult<()> {
        self.revoked.lock().unwrap().insert(job_id.to_string());
        debug!("作业 {} 已标记撤销", job_id);
        Ok(())
    }
}
