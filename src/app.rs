use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

use publisher_api::{create_routes, AppState};
use publisher_core::AppConfig;
use publisher_domain::{TaskRepository, TaskStatus};
use publisher_infrastructure::{
    metrics as app_metrics, CommandPipelineRunner, CommandPublishAdapter,
    PostgresDecisionLogRepository, PostgresProjectRepository, PostgresTaskRepository,
    UnconfiguredPublishAdapter, WorkerPoolExecutor,
};
use publisher_orchestrator::{
    BulkDispatcher, DefaultReadinessChecklist, PlannerService, PublishAdapter, TaskLifecycle,
    Watchdog,
};

/// 应用运行模式
#[derive(Debug, Clone, Copy)]
pub enum AppMode {
    /// 仅运行API服务器
    Api,
    /// 仅运行后台作业（发布调度 + 看门狗）
    Jobs,
    /// 运行所有组件
    All,
}

/// 主应用程序：装配仓储、状态机、规划器、看门狗与 HTTP 层
pub struct Application {
    config: Arc<AppConfig>,
    mode: AppMode,
    state: AppState,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("连接数据库失败")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("执行数据库迁移失败")?;

        let task_repo = Arc::new(PostgresTaskRepository::new(pool.clone()));
        let project_repo = Arc::new(PostgresProjectRepository::new(pool.clone()));
        let decision_log = Arc::new(PostgresDecisionLogRepository::new(pool.clone()));

        let runner = Arc::new(CommandPipelineRunner::from_config(&config.executor));
        let executor = WorkerPoolExecutor::new(runner, config.executor.max_concurrent_tasks);

        let publish_adapter: Arc<dyn PublishAdapter> = match &config.executor.publish_command {
            Some(command) => Arc::new(CommandPublishAdapter::new(command.clone())),
            None => {
                warn!("未配置 publish_command，发布尝试将直接失败");
                Arc::new(UnconfiguredPublishAdapter)
            }
        };

        let lifecycle = Arc::new(TaskLifecycle::new(
            task_repo.clone(),
            project_repo.clone(),
            decision_log.clone(),
            Arc::new(executor.clone()),
            publish_adapter,
            Arc::new(DefaultReadinessChecklist),
        ));
        executor.bind_lifecycle(lifecycle.clone());

        let planner = Arc::new(PlannerService::new(
            task_repo.clone(),
            project_repo.clone(),
            decision_log.clone(),
            lifecycle.clone(),
        ));
        let watchdog = Arc::new(Watchdog::new(
            task_repo.clone(),
            decision_log.clone(),
            lifecycle.clone(),
            config.watchdog.clone(),
        ));
        let bulk = Arc::new(BulkDispatcher::new(lifecycle.clone()));

        let metrics_handle = match app_metrics::install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("指标 recorder 安装失败，/metrics 不可用: {}", e);
                None
            }
        };

        let config = Arc::new(config);
        let state = AppState {
            task_repo,
            lifecycle,
            planner,
            watchdog,
            bulk,
            config: config.clone(),
            metrics_handle,
        };

        Ok(Self {
            config,
            mode,
            state,
        })
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);
        match self.mode {
            AppMode::Api => self.run_api(shutdown_rx).await,
            AppMode::Jobs => {
                self.run_jobs(shutdown_rx).await;
                Ok(())
            }
            AppMode::All => {
                let jobs_rx = shutdown_rx.resubscribe();
                let this = self.clone_jobs();
                let jobs = tokio::spawn(async move { this.run(jobs_rx).await });
                let result = self.run_api(shutdown_rx).await;
                let _ = jobs.await;
                result
            }
        }
    }

    fn clone_jobs(&self) -> BackgroundJobs {
        BackgroundJobs {
            config: self.config.clone(),
            state: self.state.clone(),
        }
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let app = create_routes(self.state.clone());
        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API 服务监听 {}", self.config.api.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .context("API 服务异常退出")?;
        Ok(())
    }

    async fn run_jobs(&self, shutdown_rx: broadcast::Receiver<()>) {
        self.clone_jobs().run(shutdown_rx).await;
    }
}

/// 后台作业：发布调度循环与看门狗循环
///
/// 两者都是对任务快照的有界同步遍历，不持有长事务；
/// 开关在每次触发时读取一次。
struct BackgroundJobs {
    config: Arc<AppConfig>,
    state: AppState,
}

impl BackgroundJobs {
    async fn run(self, shutdown_rx: broadcast::Receiver<()>) {
        let scheduler_rx = shutdown_rx.resubscribe();
        let watchdog_rx = shutdown_rx.resubscribe();

        let scheduler = {
            let jobs = BackgroundJobs {
                config: self.config.clone(),
                state: self.state.clone(),
            };
            tokio::spawn(async move { jobs.scheduler_loop(scheduler_rx).await })
        };
        let watchdog = {
            let jobs = BackgroundJobs {
                config: self.config.clone(),
                state: self.state.clone(),
            };
            tokio::spawn(async move { jobs.watchdog_loop(watchdog_rx).await })
        };

        let _ = scheduler.await;
        let _ = watchdog.await;
    }

    /// 发布调度：把 scheduled_at 到期的 ready_for_publish 任务派发出去
    async fn scheduler_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.scheduler.interval_seconds.max(1),
        ));
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {}
            }
            if !self.config.scheduler.enabled {
                continue;
            }
            self.dispatch_due_publishes().await;
        }
        info!("发布调度循环退出");
    }

    async fn dispatch_due_publishes(&self) {
        let due = match self
            .state
            .task_repo
            .due_for_publish(Utc::now(), self.config.scheduler.dispatch_batch_size)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!("查询到期任务失败: {}", e);
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        info!("发布调度: {} 个任务到期", due.len());

        for task in due {
            match self.state.lifecycle.attempt_publish(task.id, false).await {
                Ok(saved) => {
                    app_metrics::record_publish_attempt(saved.status == TaskStatus::Published);
                }
                Err(e) => {
                    // 并发路径可能已经处理过该任务，冲突不算异常
                    warn!("派发任务 {} 发布失败: {}", task.id, e);
                }
            }
        }
    }

    /// 看门狗：恢复卡死任务
    async fn watchdog_loop(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(Duration::from_secs(
            self.config.watchdog.interval_seconds.max(1),
        ));
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = interval.tick() => {}
            }
            if !self.config.watchdog.enabled {
                continue;
            }
            let started = std::time::Instant::now();
            match self.state.watchdog.run(false).await {
                Ok(report) => {
                    app_metrics::record_watchdog_pass(
                        report.stuck_count,
                        false,
                        started.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => error!("看门狗运行失败: {}", e),
            }
        }
        info!("看门狗循环退出");
    }
}
