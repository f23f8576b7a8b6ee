//! 领域仓储抽象
//!
//! 任务存储是外部持久化，这里只定义编排核心需要的访问接口。
//! `update_guarded` 是状态机写路径的并发保护：带上读取时的
//! status/updated_at 做比较交换，输掉竞争的一方得到 Conflict 而不是
//! 悄悄覆盖。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    DecisionRecord, Destination, ProjectConfig, PublishTask, TaskFilter, TaskStatus,
};
use publisher_core::PublisherResult;

/// 发布任务仓储抽象
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn create(&self, task: &PublishTask) -> PublisherResult<PublishTask>;
    async fn get_by_id(&self, id: i64) -> PublisherResult<Option<PublishTask>>;
    async fn list(&self, filter: &TaskFilter) -> PublisherResult<Vec<PublishTask>>;
    async fn get_by_status(&self, status: TaskStatus) -> PublisherResult<Vec<PublishTask>>;

    /// 比较交换式更新：仅当存量行的 status/updated_at 与期望一致时写入，
    /// 否则返回 `PublisherError::Conflict`
    async fn update_guarded(
        &self,
        task: &PublishTask,
        expected_status: TaskStatus,
        expected_updated_at: DateTime<Utc>,
    ) -> PublisherResult<PublishTask>;

    async fn count_by_status(&self) -> PublisherResult<Vec<(TaskStatus, i64)>>;

    /// 某目的地在给定 UTC 时间段内已发布的任务数
    async fn count_published_between(
        &self,
        project_id: i64,
        destination_account_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PublisherResult<i64>;

    /// 某目的地最近发布的任务，按发布时间倒序
    async fn recent_published(
        &self,
        project_id: i64,
        destination_account_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> PublisherResult<Vec<PublishTask>>;

    /// scheduled_at 已到期、等待派发发布的 ready_for_publish 任务
    async fn due_for_publish(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> PublisherResult<Vec<PublishTask>>;
}

/// 项目配置仓储抽象，编排器只读
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    async fn get_by_id(&self, id: i64) -> PublisherResult<Option<ProjectConfig>>;
    async fn destinations_for_project(&self, project_id: i64)
        -> PublisherResult<Vec<Destination>>;
}

/// 决策日志仓储抽象，滚动保留
#[async_trait]
pub trait DecisionLogRepository: Send + Sync {
    async fn append(&self, record: &DecisionRecord) -> PublisherResult<DecisionRecord>;
    async fn recent(&self, limit: i64) -> PublisherResult<Vec<DecisionRecord>>;
}
