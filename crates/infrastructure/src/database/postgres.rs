//! PostgreSQL 仓储实现
//!
//! 行映射全部手写 try_get，状态列依赖 domain 的 sqlx 映射。
//! `update_guarded` 用 `WHERE id AND status AND updated_at` 实现
//! 比较交换，零行命中时区分"不存在"与"并发冲突"。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use publisher_core::{PublisherError, PublisherResult};
use publisher_domain::{
    DecisionLogRepository, DecisionRecord, Destination, ModerationMode, ProjectConfig,
    ProjectRepository, PublishSettings, PublishTask, TaskFilter, TaskRepository, TaskStatus,
};

const TASK_COLUMNS: &str = "id, project_id, platform, destination_account_id, status, priority, \
     scheduled_at, candidate_id, virality_score, pause_requested_at, paused_at, pause_reason, \
     paused_from, cancel_requested_at, canceled_at, cancel_reason, executor_job_id, \
     processing_started_at, processing_finished_at, published_url, published_external_id, \
     published_at, publish_error, error_message, metrics_snapshot, artifacts, created_at, updated_at";

pub struct PostgresTaskRepository {
    pool: PgPool,
}

impl PostgresTaskRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_task(row: &sqlx::postgres::PgRow) -> PublisherResult<PublishTask> {
        let paused_from = row
            .try_get::<Option<String>, _>("paused_from")?
            .map(|s| {
                TaskStatus::parse(&s)
                    .ok_or_else(|| PublisherError::database_error(format!("无效的 paused_from: {s}")))
            })
            .transpose()?;

        Ok(PublishTask {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            platform: row.try_get("platform")?,
            destination_account_id: row.try_get("destination_account_id")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            scheduled_at: row.try_get("scheduled_at")?,
            candidate_id: row.try_get("candidate_id")?,
            virality_score: row.try_get("virality_score")?,
            pause_requested_at: row.try_get("pause_requested_at")?,
            paused_at: row.try_get("paused_at")?,
            pause_reason: row.try_get("pause_reason")?,
            paused_from,
            cancel_requested_at: row.try_get("cancel_requested_at")?,
            canceled_at: row.try_get("canceled_at")?,
            cancel_reason: row.try_get("cancel_reason")?,
            executor_job_id: row.try_get("executor_job_id")?,
            processing_started_at: row.try_get("processing_started_at")?,
            processing_finished_at: row.try_get("processing_finished_at")?,
            published_url: row.try_get("published_url")?,
            published_external_id: row.try_get("published_external_id")?,
            published_at: row.try_get("published_at")?,
            publish_error: row.try_get("publish_error")?,
            error_message: row.try_get("error_message")?,
            metrics_snapshot: row.try_get("metrics_snapshot")?,
            artifacts: row
                .try_get::<Option<serde_json::Value>, _>("artifacts")?
                .unwrap_or(serde_json::Value::Null),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create(&self, task: &PublishTask) -> PublisherResult<PublishTask> {
        let sql = format!(
            "INSERT INTO publish_tasks \
             (project_id, platform, destination_account_id, status, priority, scheduled_at, \
              candidate_id, virality_score, artifacts, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(task.project_id)
            .bind(&task.platform)
            .bind(task.destination_account_id)
            .bind(task.status)
            .bind(task.priority)
            .bind(task.scheduled_at)
            .bind(task.candidate_id)
            .bind(task.virality_score)
            .bind(&task.artifacts)
            .bind(task.created_at)
            .bind(task.updated_at)
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_task(&row)
    }

    async fn get_by_id(&self, id: i64) -> PublisherResult<Option<PublishTask>> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM publish_tasks WHERE id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(|r| Self::row_to_task(&r)).transpose()
    }

    async fn list(&self, filter: &TaskFilter) -> PublisherResult<Vec<PublishTask>> {
        let mut builder: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(format!(
            "SELECT {TASK_COLUMNS} FROM publish_tasks WHERE 1 = 1"
        ));
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status);
        }
        if let Some(project_id) = filter.project_id {
            builder.push(" AND project_id = ").push_bind(project_id);
        }
        if let Some(dest) = filter.destination_account_id {
            builder
                .push(" AND destination_account_id = ")
                .push_bind(dest);
        }
        builder.push(" ORDER BY priority DESC, id ASC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }
        if let Some(offset) = filter.offset {
            builder.push(" OFFSET ").push_bind(offset);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_by_status(&self, status: TaskStatus) -> PublisherResult<Vec<PublishTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM publish_tasks WHERE status = $1 ORDER BY id ASC"
        );
        let rows = sqlx::query(&sql).bind(status).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn update_guarded(
        &self,
        task: &PublishTask,
        expected_status: TaskStatus,
        expected_updated_at: DateTime<Utc>,
    ) -> PublisherResult<PublishTask> {
        let sql = format!(
            "UPDATE publish_tasks SET \
               status = $1, priority = $2, scheduled_at = $3, candidate_id = $4, \
               virality_score = $5, pause_requested_at = $6, paused_at = $7, pause_reason = $8, \
               paused_from = $9, cancel_requested_at = $10, canceled_at = $11, cancel_reason = $12, \
               executor_job_id = $13, processing_started_at = $14, processing_finished_at = $15, \
               published_url = $16, published_external_id = $17, published_at = $18, \
               publish_error = $19, error_message = $20, metrics_snapshot = $21, artifacts = $22, \
               updated_at = $23 \
             WHERE id = $24 AND status = $25 AND updated_at = $26 \
             RETURNING {TASK_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(task.status)
            .bind(task.priority)
            .bind(task.scheduled_at)
            .bind(task.candidate_id)
            .bind(task.virality_score)
            .bind(task.pause_requested_at)
            .bind(task.paused_at)
            .bind(&task.pause_reason)
            .bind(task.paused_from.map(|s| s.as_str()))
            .bind(task.cancel_requested_at)
            .bind(task.canceled_at)
            .bind(&task.cancel_reason)
            .bind(&task.executor_job_id)
            .bind(task.processing_started_at)
            .bind(task.processing_finished_at)
            .bind(&task.published_url)
            .bind(&task.published_external_id)
            .bind(task.published_at)
            .bind(&task.publish_error)
            .bind(&task.error_message)
            .bind(&task.metrics_snapshot)
            .bind(&task.artifacts)
            .bind(task.updated_at)
            .bind(task.id)
            .bind(expected_status)
            .bind(expected_updated_at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::row_to_task(&row),
            None => {
                // 零行命中：不存在还是被并发改写了
                match self.get_by_id(task.id).await? {
                    None => Err(PublisherError::task_not_found(task.id)),
                    Some(current) => {
                        debug!(
                            "任务 {} 守卫更新失败: 期望 {}, 实际 {}",
                            task.id, expected_status, current.status
                        );
                        Err(PublisherError::conflict(format!(
                            "任务 {} 已被并发修改 (期望 {}, 实际 {})",
                            task.id, expected_status, current.status
                        )))
                    }
                }
            }
        }
    }

    async fn count_by_status(&self) -> PublisherResult<Vec<(TaskStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM publish_tasks GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let status: TaskStatus = row.try_get("status")?;
                let count: i64 = row.try_get("count")?;
                Ok((status, count))
            })
            .collect()
    }

    async fn count_published_between(
        &self,
        project_id: i64,
        destination_account_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> PublisherResult<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM publish_tasks \
             WHERE project_id = $1 AND destination_account_id = $2 \
               AND status = $3 AND published_at >= $4 AND published_at < $5",
        )
        .bind(project_id)
        .bind(destination_account_id)
        .bind(TaskStatus::Published)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("count")?)
    }

    async fn recent_published(
        &self,
        project_id: i64,
        destination_account_id: i64,
        since: DateTime<Utc>,
        limit: i64,
    ) -> PublisherResult<Vec<PublishTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM publish_tasks \
             WHERE project_id = $1 AND destination_account_id = $2 \
               AND status = $3 AND published_at >= $4 \
             ORDER BY published_at DESC LIMIT $5"
        );
        let rows = sqlx::query(&sql)
            .bind(project_id)
            .bind(destination_account_id)
            .bind(TaskStatus::Published)
            .bind(since)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn due_for_publish(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> PublisherResult<Vec<PublishTask>> {
        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM publish_tasks \
             WHERE status = $1 AND scheduled_at IS NOT NULL AND scheduled_at <= $2 \
             ORDER BY priority DESC, scheduled_at ASC LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(TaskStatus::ReadyForPublish)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_task).collect()
    }
}

pub struct PostgresProjectRepository {
    pool: PgPool,
}

impl PostgresProjectRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProjectRepository for PostgresProjectRepository {
    async fn get_by_id(&self, id: i64) -> PublisherResult<Option<ProjectConfig>> {
        let row = sqlx::query(
            "SELECT id, name, moderation_mode, publish_settings FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let moderation_mode: ModerationMode = row.try_get("moderation_mode")?;
            let publish: PublishSettings = row
                .try_get::<Option<serde_json::Value>, _>("publish_settings")?
                .map(serde_json::from_value)
                .transpose()?
                .unwrap_or_default();
            Ok(ProjectConfig {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                moderation_mode,
                publish,
            })
        })
        .transpose()
    }

    async fn destinations_for_project(
        &self,
        project_id: i64,
    ) -> PublisherResult<Vec<Destination>> {
        let rows = sqlx::query(
            "SELECT id, project_id, platform, social_account_id, daily_limit, priority, is_active \
             FROM destinations WHERE project_id = $1 ORDER BY priority DESC, id ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Destination {
                    id: row.try_get("id")?,
                    project_id: row.try_get("project_id")?,
                    platform: row.try_get("platform")?,
                    social_account_id: row.try_get("social_account_id")?,
                    daily_limit: row.try_get("daily_limit")?,
                    priority: row.try_get("priority")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect()
    }
}

pub struct PostgresDecisionLogRepository {
    pool: PgPool,
}

impl PostgresDecisionLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DecisionLogRepository for PostgresDecisionLogRepository {
    async fn append(&self, record: &DecisionRecord) -> PublisherResult<DecisionRecord> {
        let row = sqlx::query(
            "INSERT INTO decision_log (project_id, action, payload, created_at) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, project_id, action, payload, created_at",
        )
        .bind(record.project_id)
        .bind(&record.action)
        .bind(&record.payload)
        .bind(record.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(DecisionRecord {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            action: row.try_get("action")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn recent(&self, limit: i64) -> PublisherResult<Vec<DecisionRecord>> {
        let rows = sqlx::query(
            "SELECT id, project_id, action, payload, created_at FROM decision_log \
             ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DecisionRecord {
                    id: row.try_get("id")?,
                    project_id: row.try_get("project_id")?,
                    action: row.try_get("action")?,
                    payload: row.try_get("payload")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}
