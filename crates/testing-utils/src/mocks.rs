//! 仓储与端口的内存 Mock 实现
//!
//! `MockTaskRepository::update_guarded` 保留与真实实现一致的
//! 比较交换语义，并发冲突测试依赖这一点。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::{
    DecisionLogRepository, DecisionRecord, Destination, ProjectConfig, ProjectRepository,
    PublishTask, TaskFilter, TaskRepository, TaskStatus,
};
use publisher_orchestrator::{PublishAdapter, PublishSuccess, StepExecutor};

/// 发布任务仓储的内存实现
#[derive(Clone, Default)]
pub struct MockTaskRepository {
    tasks: Arc<Mutex<HashMap<i64, PublishTask>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MockTaskRepository {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    pub fn with_tasks(tasks: Vec<PublishTask>) -> Self {
        let mut map = HashMap::new();
        let mut max_id = 0;
        for task in tasks {
            max_id = max_id.max(task.id);
            map.insert(task.id, task);
        }
        Self {
            tasks: Arc::new(Mutex::new(map)),
            next_id: Arc::new(Mutex::new(max_id + 1)),
        }
    }

    pub fn count(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    /// 测试用：绕过守卫直接写入
    pub fn put(&self, task: PublishTask) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }
}

#[async_trait]
impl TaskRepository for MockTaskRepository {
    async fn create(&self, task: &PublishTask) -> PublisherResult<PublishTask> {
        let mut tasks = self.tasks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();
        let mut new_task = task.clone();
        new_task.id = *next_id;
        *next_id += 1;
        tasks.insert(new_task.id, new_task.clone());
        Ok(new_task)
    }

    async fn get_by_id(&self, id: i64) -> PublisherResult<Option<PublishTask>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn list(&self, filter: &TaskFilter) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut result: Vec<PublishTask> = tasks.values().cloned().collect();
        if let Some(status) = filter.status {
            result.retain(|t| t.status == status);
        }
        if let Some(project_id) = filter.project_id {
            result.retain(|t| t.project_id == project_id);
        }
        if let Some(dest) = filter.destination_account_id {
            result.retain(|t| t.destination_account_id == dest);
        }
        result.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(offset) = filter.offset {
            result = result.into_iter().skip(offset as usize).collect();
        }
        if let Some(limit) = filter.limit {
            result.truncate(limit as usize);
        }
        Ok(result)
    }

    async fn get_by_status(&self, status: TaskStatus) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut result: Vec<PublishTask> = tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect();
        result.sort_by_key(|t| t.id);
        Ok(result)
    }

    async fn update_guarded(
        &self,
        task: &PublishTask,
        expected_status: TaskStatus,
        expected_updated_at: DateTime<Utc>,
    ) -> PublisherResult<PublishTask> {
        let mut tasks = self.tasks.lock().unwrap();
        let stored = tasks
            .get(&task.id)
            .ok_or_else(|| PublisherError::task_not_found(task.id))?;
        if stored.status != expected_status || stored.updated_at != expected_updated_at {
            return Err(PublisherError::conflict(format!(
                "任务 {} 已被并发修改 (期望 {}, 实际 {})",
                task.id, expected_status, stored.status
            )));
        }
        tasks.insert(task.id, task.clone());
        Ok(task.clone())
    }

    async fn count_by_status(&self) -> PublisherResult<Vec<(TaskStatus, i64)>> {
        let tasks = self.tasks.lock().unwrap();
        let mut counts: HashMap<TaskStatus, i64> = HashMap::new();
        for task in tasks.values() {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        let mut result: Vec<(TaskStatus, i64)> = counts.into_iter().collect();
        result.sort_by_key(|(s, _)| s.as_str());
        Ok(result)
    }

    async fn count_published_between(
        &self,
        project_id: i64,
        destination_account_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PublisherResult<i64> {
        let tasks = self.tasks.lock().unwrap();
        Ok(tasks
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && t.destination_account_id == destination_account_id
                    && t.status == TaskStatus::Published
                    && t.published_at.map(|p| p >= from && p < to).unwrap_or(false)
            })
            .count() as i64)
    }

    async fn recent_published(
        &self,
        project_id: i64,
        destination_account_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut result: Vec<PublishTask> = tasks
            .values()
            .filter(|t| {
                t.project_id == project_id
                    && t.destination_account_id == destination_account_id
                    && t.status == TaskStatus::Published
                    && t.published_at.map(|p| p >= since).unwrap_or(false)
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        result.truncate(limit as usize);
        Ok(result)
    }

    async fn due_for_publish(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> PublisherResult<Vec<PublishTask>> {
        let tasks = self.tasks.lock().unwrap();
        let mut result: Vec<PublishTask> = tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::ReadyForPublish
                    && t.scheduled_at.map(|s| s <= now).unwrap_or(false)
            })
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.scheduled_at.cmp(&b.scheduled_at))
        });
        result.truncate(limit as usize);
        Ok(result)
    }
}

/// 项目配置仓储的内存实现
#[derive(Clone, Default)]
pub struct MockProjectRepository {
    projects: Arc<Mutex<HashMap<i64, ProjectConfig>>>,
    destinations: Arc<Mutex<HashMap<i64, Vec<Destination>>>>,
}

impl MockProjectRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_project(&self, project: ProjectConfig) {
        self.projects.lock().unwrap().insert(project.id, project);
    }

    pub fn put_destinations(&self, project_id: i64, destinations: Vec<Destination>) {
        self.destinations
            .lock()
            .unwrap()
            .insert(project_id, destinations);
    }
}

#[async_trait]
impl ProjectRepository for MockProjectRepository {
    async fn get_by_id(&self, id: i64) -> PublisherResult<Option<ProjectConfig>> {
        Ok(self.projects.lock().unwrap().get(&id).cloned())
    }

    async fn destinations_for_project(
        &self,
        project_id: i64,
    ) -> PublisherResult<Vec<Destination>> {
        Ok(self
            .destinations
            .lock()
            .unwrap()
            .get(&project_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// 决策日志仓储的内存实现
#[derive(Clone, Default)]
pub struct MockDecisionLogRepository {
    records: Arc<Mutex<Vec<DecisionRecord>>>,
}

impl MockDecisionLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&self) -> Vec<DecisionRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionLogRepository for MockDecisionLogRepository {
    async fn append(&self, record: &DecisionRecord) -> PublisherResult<DecisionRecord> {
        let mut records = self.records.lock().unwrap();
        let mut stored = record.clone();
        stored.id = records.len() as i64 + 1;
        records.push(stored.clone());
        Ok(stored)
    }

    async fn recent(&self, limit: i64) -> PublisherResult<Vec<DecisionRecord>> {
        let records = self.records.lock().unwrap();
        let mut result: Vec<DecisionRecord> = records.clone();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        result.truncate(limit as usize);
        Ok(result)
    }
}

/// 步骤执行器 Mock：记录派发与撤销，不实际跑流水线
#[derive(Default)]
pub struct MockStepExecutor {
    dispatched: Mutex<Vec<i64>>,
    revoked: Mutex<Vec<String>>,
    next_job: AtomicI64,
    fail_dispatch: AtomicBool,
}

impl MockStepExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatched_ids(&self) -> Vec<i64> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn revoked_jobs(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }

    pub fn set_fail_dispatch(&self, fail: bool) {
        self.fail_dispatch.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl StepExecutor for MockStepExecutor {
    async fn dispatch(&self, task: &PublishTask) -> PublisherResult<String> {
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(PublisherError::Executor("dispatch rejected".to_string()));
        }
        self.dispatched.lock().unwrap().push(task.id);
        let n = self.next_job.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("job-{n}"))
    }

    async fn revoke(&self, job_id: &str) -> PublisherResult<()> {
        self.revoked.lock().unwrap().push(job_id.to_string());
        Ok(())
    }
}

/// 平台发布适配器 Mock：按脚本返回结果，默认成功
#[derive(Default)]
pub struct MockPublishAdapter {
    script: Mutex<Vec<Result<PublishSuccess, String>>>,
    calls: AtomicI64,
}

impl MockPublishAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置下一次 publish 的结果，先进先出
    pub fn push_result(&self, result: Result<PublishSuccess, String>) {
        self.script.lock().unwrap().push(result);
    }

    pub fn call_count(&self) -> i64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishAdapter for MockPublishAdapter {
    async fn publish(&self, task: &PublishTask) -> PublisherResult<PublishSuccess> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        match scripted {
            Some(Ok(success)) => Ok(success),
            Some(Err(message)) => Err(PublisherError::Executor(message)),
            None => Ok(PublishSuccess {
                url: format!("https://video.example/{}", task.id),
                external_id: Some(format!("ext-{}", task.id)),
            }),
        }
    }
}
