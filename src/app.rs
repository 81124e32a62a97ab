use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use dataflow_config::AppConfig;
use dataflow_connectors::ConnectorRegistry;
use dataflow_dispatcher::{
    BatchExecutor, DataFlowService, HeartbeatReport, HeartbeatScheduler, RunCleanupService,
    StartupReport, StartupService,
};
use dataflow_domain::{DataFlow, DataFlowRun};
use dataflow_infrastructure::{DatabaseManager, MetricsCollector};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 启动整理后持续运行心跳与清理循环，直到收到关闭信号
    Serve,
    /// 启动整理后执行一次心跳
    Once,
    /// 打印数据流及其最近一次运行
    List,
}

impl std::str::FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "serve" => Ok(AppMode::Serve),
            "once" => Ok(AppMode::Once),
            "list" => Ok(AppMode::List),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

/// `list` 模式的一行
#[derive(Debug, Clone)]
pub struct FlowSummary {
    pub flow: DataFlow,
    pub latest_run: Option<DataFlowRun>,
}

/// 主应用程序：装配仓储、连接器注册表和调度组件
pub struct Application {
    config: AppConfig,
    database: DatabaseManager,
    service: Arc<DataFlowService>,
    heartbeat: HeartbeatScheduler,
    startup: StartupService,
    cleanup: RunCleanupService,
}

impl Application {
    /// 连接数据库并执行迁移，使用内置连接器
    pub async fn new(config: AppConfig) -> Result<Self> {
        let database = DatabaseManager::new(&config.database)
            .await
            .context("初始化数据库失败")?;
        info!("数据库已就绪: {:?}", database.database_type());
        Ok(Self::with_parts(config, database, ConnectorRegistry::with_builtins()))
    }

    /// 宿主程序可以传入注册了自定义连接器的注册表
    pub fn with_parts(config: AppConfig, database: DatabaseManager, registry: ConnectorRegistry) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        let runs = database.run_repository();
        let service = Arc::new(DataFlowService::new(
            database.data_flow_repository(),
            runs.clone(),
            metrics.clone(),
        ));
        let executor = Arc::new(BatchExecutor::new(
            Arc::new(registry),
            service.clone(),
            metrics.clone(),
        ));
        let heartbeat = HeartbeatScheduler::new(service.clone(), executor, metrics);
        let startup = StartupService::new(service.clone(), &config.scheduler);
        let cleanup = RunCleanupService::new(runs, &config.scheduler);

        Self {
            config,
            database,
            service,
            heartbeat,
            startup,
            cleanup,
        }
    }

    pub fn service(&self) -> &Arc<DataFlowService> {
        &self.service
    }

    pub async fn startup(&self) -> Result<StartupReport> {
        let report = self
            .startup
            .run(&self.config.flows, Utc::now())
            .await
            .context("启动整理失败")?;
        info!(
            "启动整理完成: 中断 {} 个, 过期取消 {} 个, 补排期 {} 个, 注册数据流 {} 个",
            report.interrupted, report.overdue_cancelled, report.scheduled, report.registered
        );
        Ok(report)
    }

    pub async fn run_once(&self) -> Result<HeartbeatReport> {
        self.startup().await?;
        self.heartbeat
            .heartbeat(Utc::now())
            .await
            .context("执行心跳失败")
    }

    pub async fn list(&self) -> Result<Vec<FlowSummary>> {
        let flows = self.service.flows().list().await.context("查询数据流失败")?;
        let mut summaries = Vec::with_capacity(flows.len());
        for flow in flows {
            let latest_run = self
                .service
                .runs()
                .find_by_data_flow(flow.id)
                .await
                .context("查询运行记录失败")?
                .into_iter()
                .next();
            summaries.push(FlowSummary { flow, latest_run });
        }
        Ok(summaries)
    }

    /// 心跳循环和清理循环，收到关闭信号后退出；单次心跳的错误只记录日志
    pub async fn serve(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.startup().await?;

        if !self.config.scheduler.enabled {
            warn!("调度器已在配置中禁用，只等待关闭信号");
            let _ = shutdown_rx.recv().await;
            return Ok(());
        }

        let mut heartbeat_tick = interval(Duration::from_secs(
            self.config.scheduler.heartbeat_interval_seconds,
        ));
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cleanup_tick = interval(Duration::from_secs(
            self.config.scheduler.cleanup_interval_seconds,
        ));
        cleanup_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "调度循环启动，心跳间隔 {} 秒",
            self.config.scheduler.heartbeat_interval_seconds
        );

        loop {
            tokio::select! {
                _ = heartbeat_tick.tick() => {
                    if let Err(e) = self.heartbeat.heartbeat(Utc::now()).await {
                        error!("心跳执行失败: {e}");
                    }
                }
                _ = cleanup_tick.tick() => {
                    if let Err(e) = self.cleanup.cleanup_old_runs(Utc::now()).await {
                        error!("清理历史运行记录失败: {e}");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("调度循环收到关闭信号");
                    break;
                }
            }
        }

        Ok(())
    }

    pub async fn close(&self) {
        self.database.close().await;
    }
}
