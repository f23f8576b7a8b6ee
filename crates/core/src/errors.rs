use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 就绪检查单项结果，`mark-ready-for-publish` 整组返回给调用方
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub check: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn pass<C: Into<String>, D: Into<String>>(check: C, detail: D) -> Self {
        Self {
            check: check.into(),
            ok: true,
            detail: detail.into(),
        }
    }
    pub fn fail<C: Into<String>, D: Into<String>>(check: C, detail: D) -> Self {
        Self {
            check: check.into(),
            ok: false,
            detail: detail.into(),
        }
    }
}

#[derive(Error, Debug, Clone)]
pub enum PublisherError {
    #[error("请求参数无效: {0}")]
    Validation(String),
    #[error("发布任务不存在: id={id}")]
    TaskNotFound { id: i64 },
    #[error("项目不存在: id={id}")]
    ProjectNotFound { id: i64 },
    #[error("状态 {status} 不允许执行 {operation}")]
    PreconditionFailed { status: String, operation: String },
    #[error("就绪检查未通过")]
    ChecklistFailed { checks: Vec<CheckResult> },
    #[error("任务 {id} 已发布，重试需要 force=true")]
    AlreadyPublished { id: i64 },
    #[error("并发写入冲突: {0}")]
    Conflict(String),
    #[error("执行器操作失败: {0}")]
    Executor(String),
    #[error("数据库操作失败: {0}")]
    DatabaseOperation(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("数据序列化错误: {0}")]
    Serialization(String),
    #[error("系统内部错误: {0}")]
    Internal(String),
}

pub type PublisherResult<T> = Result<T, PublisherError>;

impl PublisherError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn project_not_found(id: i64) -> Self {
        Self::ProjectNotFound { id }
    }
    pub fn precondition<A: Into<String>, B: Into<String>>(status: A, operation: B) -> Self {
        Self::PreconditionFailed {
            status: status.into(),
            operation: operation.into(),
        }
    }
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }
    pub fn database_error<S: Into<String>>(msg: S) -> Self {
        Self::DatabaseOperation(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// 并发冲突类错误，调用方重新读取后可以重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublisherError::Conflict(_) | PublisherError::DatabaseOperation(_)
        )
    }
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PublisherError::Internal(_) | PublisherError::Configuration(_)
        )
    }

    /// 批量操作里按条目上报的机器可读原因
    pub fn bulk_reason(&self) -> String {
        match self {
            PublisherError::TaskNotFound { .. } => "not_found".to_string(),
            PublisherError::PreconditionFailed { status, .. } => {
                format!("invalid_status:{status}")
            }
            PublisherError::AlreadyPublished { .. } => "already_published".to_string(),
            PublisherError::Conflict(_) => "conflict".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for PublisherError {
    fn from(err: sqlx::Error) -> Self {
        PublisherError::DatabaseOperation(err.to_string())
    }
}

impl From<serde_json::Error> for PublisherError {
    fn from(err: serde_json::Error) -> Self {
        PublisherError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for PublisherError {
    fn from(err: anyhow::Error) -> Self {
        PublisherError::Internal(err.to_string())
    }
}
