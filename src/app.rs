use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info};

use orchestrator_core::{AppConfig, JobDispatcher};
use orchestrator_dispatcher::{LoadBalancerFactory, Orchestrator, OrchestratorStatus, WorkerRegistry};
use orchestrator_infrastructure::{HttpJobDispatcher, LoggingDispatcher, QueueBackendFactory};

/// 启动选项（来自命令行）
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// 两次状态日志之间的间隔
    pub status_interval: Duration,
    /// 只记录分发日志，不向Worker发送请求
    pub dry_run: bool,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            status_interval: Duration::from_secs(30),
            dry_run: false,
        }
    }
}

/// 主应用程序：装配队列后端、注册表、负载均衡策略与分发器
pub struct Application {
    orchestrator: Arc<Orchestrator>,
    options: AppOptions,
}

impl Application {
    pub fn new(config: AppConfig, options: AppOptions) -> Result<Self> {
        info!(
            "初始化应用程序 (队列后端: {}, 策略: {})",
            config.queue.backend.as_str(),
            config.dispatcher.load_balancing_policy
        );

        let backend = QueueBackendFactory::create(&config.queue).context("创建队列后端失败")?;
        let registry = Arc::new(WorkerRegistry::new(config.registry.clone()));
        let balancer = LoadBalancerFactory::from_name(&config.dispatcher.load_balancing_policy);

        let dispatcher: Arc<dyn JobDispatcher> = if options.dry_run {
            info!("dry-run模式：任务只记录日志，不发送给Worker");
            Arc::new(LoggingDispatcher)
        } else {
            Arc::new(
                HttpJobDispatcher::from_config(&config.dispatcher)
                    .context("创建HTTP分发器失败")?,
            )
        };

        let orchestrator = Orchestrator::new(
            backend,
            registry,
            balancer,
            dispatcher,
            config.dispatcher.clone(),
        );

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            options,
        })
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        self.orchestrator.clone()
    }

    /// 启动编排器，周期性输出状态，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        if !self.orchestrator.start().await {
            anyhow::bail!("编排器启动失败");
        }

        let mut ticker = tokio::time::interval(self.options.status_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    log_status(&self.orchestrator.status().await);
                }
                _ = shutdown_rx.recv() => {
                    info!("应用收到关闭信号");
                    break;
                }
            }
        }

        self.orchestrator.stop().await;
        Ok(())
    }
}

fn log_status(status: &OrchestratorStatus) {
    info!(
        backend = %status.backend,
        connected = status.backend_connected,
        queue_size = status.queue_size,
        workers = status.total_workers,
        healthy_workers = status.healthy_workers,
        submitted = status.stats.submitted,
        dispatched = status.stats.dispatched,
        dropped = status.stats.dropped,
        "编排器状态"
    );
    if !status.backend_connected && status.running {
        error!("队列后端 {} 连接已断开", status.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownManager;
    use orchestrator_core::{priority, QueueBackendKind};
    use serde_json::json;

    fn dry_run_options() -> AppOptions {
        AppOptions {
            status_interval: Duration::from_millis(20),
            dry_run: true,
        }
    }

    #[tokio::test]
    async fn test_application_runs_until_shutdown() {
        let app = Arc::new(Application::new(AppConfig::default(), dry_run_options()).unwrap());
        let shutdown = ShutdownManager::new();
        let shutdown_rx = shutdown.subscribe().await;

        let handle = {
            let app = app.clone();
            tokio::spawn(async move { app.run(shutdown_rx).await })
        };

        let orchestrator = app.orchestrator();
        let mut started = false;
        for _ in 0..100 {
            if orchestrator.is_running() {
                started = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(started);
        assert!(orchestrator
            .submit("file_scan", json!("/srv/a"), priority::NORMAL, None)
            .await
            .is_some());

        shutdown.shutdown().await;
        let result = tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(!orchestrator.is_running());
    }

    #[test]
    fn test_missing_backend_section_fails_fast() {
        let mut config = AppConfig::default();
        config.queue.backend = QueueBackendKind::Rabbitmq;
        config.queue.rabbitmq = None;

        assert!(Application::new(config, dry_run_options()).is_err());
    }
}
