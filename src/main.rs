use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use tracing::{error, info, warn};

use orchestrator_core::{init_logging, AppConfig};
use orchestrator_infrastructure::QueueBackendFactory;
use scan_orchestrator::app::{AppOptions, Application};
use scan_orchestrator::shutdown::{wait_for_shutdown_signal, ShutdownManager};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("scan-orchestrator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式扫描任务编排系统")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（未指定时按默认位置查找）"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .arg(
            Arg::new("backend")
                .long("backend")
                .value_name("BACKEND")
                .help("队列后端: memory, rabbitmq, redis_stream"),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .value_name("POLICY")
                .help("负载均衡策略: least_load, round_robin, capability_match"),
        )
        .arg(
            Arg::new("status-interval")
                .long("status-interval")
                .value_name("SECONDS")
                .help("状态日志输出间隔（秒）")
                .value_parser(clap::value_parser!(u64).range(1..))
                .default_value("30"),
        )
        .arg(
            Arg::new("dry-run")
                .long("dry-run")
                .help("只记录分发日志，不向Worker发送请求")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.logging.level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.logging.format = format.clone();
    }
    if let Some(backend) = matches.get_one::<String>("backend") {
        config.queue.backend = QueueBackendFactory::parse_kind(backend)?;
    }
    if let Some(policy) = matches.get_one::<String>("policy") {
        config.dispatcher.load_balancing_policy = policy.clone();
    }

    init_logging(&config.logging.level, &config.logging.format)?;

    info!("启动分布式扫描任务编排系统");
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    let status_interval = matches
        .get_one::<u64>("status-interval")
        .copied()
        .unwrap_or(30);
    let options = AppOptions {
        status_interval: Duration::from_secs(status_interval),
        dry_run: matches.get_flag("dry-run"),
    };

    let app = Arc::new(Application::new(config, options)?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e}");
            }
        })
    };

    tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("收到关闭信号，开始优雅关闭...");
        }
        _ = wait_for_exit(&app_handle) => {
            warn!("应用提前退出");
        }
    }

    shutdown_manager.shutdown().await;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("分布式扫描任务编排系统已退出");
    Ok(())
}

async fn wait_for_exit(handle: &tokio::task::JoinHandle<()>) {
    while !handle.is_finished() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}
