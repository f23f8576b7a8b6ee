use tracing_subscriber::EnvFilter;

use crate::errors::{PublisherError, PublisherResult};

/// 初始化日志，`RUST_LOG` 优先于配置里的级别
pub fn init_logging(level: &str, format: &str) -> PublisherResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    result.map_err(|e| PublisherError::config_error(format!("初始化日志失败: {e}")))
}
