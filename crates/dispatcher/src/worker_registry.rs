use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use orchestrator_core::{
    RegistryConfig, WorkerHeartbeat, WorkerNode, WorkerRegistration, WorkerStatus,
};

/// 超过 `heartbeat_timeout` 的这一比例即标记为UNHEALTHY
pub const UNHEALTHY_THRESHOLD_RATIO: f64 = 0.8;

const MAX_SLEEP_STEP: Duration = Duration::from_secs(1);

/// 一次健康检查的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealthCheckReport {
    pub checked: usize,
    pub healthy: usize,
    pub marked_unhealthy: Vec<String>,
    pub marked_offline: Vec<String>,
}

impl HealthCheckReport {
    pub fn has_transitions(&self) -> bool {
        !self.marked_unhealthy.is_empty() || !self.marked_offline.is_empty()
    }
}

type WorkerTable = Arc<Mutex<HashMap<String, WorkerNode>>>;

/// Worker注册表
///
/// 所有写操作（注册、心跳、健康检查降级、分发时的乐观占位）都在同一把锁下进行；
/// 读取返回快照副本，调用方无需持有锁。
pub struct WorkerRegistry {
    config: RegistryConfig,
    workers: WorkerTable,
    monitoring: AtomicBool,
    monitor: Mutex<Option<MonitorTask>>,
}

/// 每次启动都使用独立的停止标志，被放弃的旧循环不会被重新唤醒
struct MonitorTask {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl WorkerRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            workers: Arc::new(Mutex::new(HashMap::new())),
            monitoring: AtomicBool::new(false),
            monitor: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 注册或替换Worker；缺少ID时返回false
    pub async fn register(&self, registration: WorkerRegistration) -> bool {
        if registration.worker_id.trim().is_empty() {
            warn!("拒绝注册：Worker描述缺少worker_id (host: {})", registration.host);
            return false;
        }

        let node = WorkerNode::from_registration(registration, Utc::now());
        let worker_id = node.worker_id.clone();
        let capabilities = node.capabilities.clone();

        let replaced = self.workers.lock().await.insert(worker_id.clone(), node);
        if replaced.is_some() {
            info!("Worker {} 重新注册，已替换原有记录", worker_id);
        } else {
            info!("Worker {} 注册成功，能力: {:?}", worker_id, capabilities);
        }
        true
    }

    pub async fn unregister(&self, worker_id: &str) -> bool {
        let removed = self.workers.lock().await.remove(worker_id).is_some();
        if removed {
            info!("Worker {} 已注销", worker_id);
        } else {
            debug!("注销未知的Worker: {}", worker_id);
        }
        removed
    }

    /// 处理心跳；未知Worker返回false，不会自动注册
    pub async fn heartbeat(&self, heartbeat: &WorkerHeartbeat) -> bool {
        let mut workers = self.workers.lock().await;
        let Some(worker) = workers.get_mut(&heartbeat.worker_id) else {
            warn!("收到未知Worker的心跳: {}", heartbeat.worker_id);
            return false;
        };

        let previous = worker.status;
        worker.apply_heartbeat(heartbeat, Utc::now());
        if previous != WorkerStatus::Healthy {
            info!(
                "Worker {} 恢复: {} -> {}",
                worker.worker_id,
                previous.as_str(),
                worker.status.as_str()
            );
        }
        true
    }

    pub async fn get(&self, worker_id: &str) -> Option<WorkerNode> {
        self.workers.lock().await.get(worker_id).cloned()
    }

    /// 全部Worker的快照，按注册时间排序
    pub async fn list_all(&self) -> Vec<WorkerNode> {
        let mut snapshot: Vec<WorkerNode> = self.workers.lock().await.values().cloned().collect();
        Self::sort_snapshot(&mut snapshot);
        snapshot
    }

    pub async fn list_healthy(&self) -> Vec<WorkerNode> {
        let mut snapshot: Vec<WorkerNode> = self
            .workers
            .lock()
            .await
            .values()
            .filter(|worker| worker.is_healthy())
            .cloned()
            .collect();
        Self::sort_snapshot(&mut snapshot);
        snapshot
    }

    fn sort_snapshot(snapshot: &mut [WorkerNode]) {
        snapshot.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.worker_id.cmp(&b.worker_id))
        });
    }

    /// 分发前的乐观占位：`current_tasks += 1`
    ///
    /// Worker未知或已满载时拒绝。计数只会通过Worker自己的心跳回落。
    pub async fn try_reserve_slot(&self, worker_id: &str) -> bool {
        let mut workers = self.workers.lock().await;
        match workers.get_mut(worker_id) {
            Some(worker) if worker.has_capacity() => {
                worker.current_tasks += 1;
                debug!(
                    "Worker {} 占用槽位 {}/{}",
                    worker_id, worker.current_tasks, worker.max_tasks
                );
                true
            }
            Some(worker) => {
                debug!(
                    "Worker {} 已满载 ({}/{})",
                    worker_id, worker.current_tasks, worker.max_tasks
                );
                false
            }
            None => false,
        }
    }

    /// 执行一次完整的健康检查
    pub async fn run_health_check(&self, now: DateTime<Utc>) -> HealthCheckReport {
        Self::scan(&self.workers, self.config.heartbeat_timeout(), now).await
    }

    async fn scan(workers: &WorkerTable, timeout: Duration, now: DateTime<Utc>) -> HealthCheckReport {
        let timeout_ms = timeout.as_millis() as i64;
        let warning_ms = (timeout_ms as f64 * UNHEALTHY_THRESHOLD_RATIO) as i64;

        let mut workers = workers.lock().await;
        let mut report = HealthCheckReport {
            checked: workers.len(),
            ..Default::default()
        };

        for worker in workers.values_mut() {
            let age_ms = worker.heartbeat_age(now).num_milliseconds();

            if age_ms > timeout_ms {
                if worker.status != WorkerStatus::Offline {
                    warn!(
                        "Worker {} 心跳超时 ({}ms)，标记为OFFLINE (上次心跳: {})",
                        worker.worker_id,
                        age_ms,
                        worker.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC")
                    );
                    worker.status = WorkerStatus::Offline;
                    report.marked_offline.push(worker.worker_id.clone());
                }
            } else if age_ms > warning_ms && worker.status == WorkerStatus::Healthy {
                warn!(
                    "Worker {} 心跳延迟 ({}ms)，标记为UNHEALTHY",
                    worker.worker_id, age_ms
                );
                worker.status = WorkerStatus::Unhealthy;
                report.marked_unhealthy.push(worker.worker_id.clone());
            }

            if worker.is_healthy() {
                report.healthy += 1;
            }
        }

        metrics::gauge!("orchestrator_healthy_workers").set(report.healthy as f64);
        report
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// 启动后台健康检查循环；已在运行时直接返回
    pub async fn start_health_monitor(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor.as_ref().is_some_and(|task| !task.handle.is_finished()) {
            debug!("健康检查循环已在运行");
            return;
        }

        let running = Arc::new(AtomicBool::new(true));
        let handle = tokio::spawn(Self::monitor_loop(
            self.workers.clone(),
            self.config.clone(),
            running.clone(),
        ));
        *monitor = Some(MonitorTask { running, handle });
        self.monitoring.store(true, Ordering::SeqCst);
    }

    /// 停止健康检查循环，在 `join_timeout` 内等待其退出
    pub async fn stop_health_monitor(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
        let Some(task) = self.monitor.lock().await.take() else {
            return;
        };
        task.running.store(false, Ordering::SeqCst);

        let join_timeout = self.config.join_timeout();
        match tokio::time::timeout(join_timeout, task.handle).await {
            Ok(Ok(())) => debug!("健康检查循环已退出"),
            Ok(Err(e)) => warn!("健康检查任务异常结束: {}", e),
            Err(_) => warn!("健康检查循环未在 {:?} 内退出，放弃等待", join_timeout),
        }
    }

    async fn monitor_loop(workers: WorkerTable, config: RegistryConfig, running: Arc<AtomicBool>) {
        info!(
            "启动Worker健康检查循环 (间隔: {:?}, 心跳超时: {:?})",
            config.health_check_interval(),
            config.heartbeat_timeout()
        );

        while running.load(Ordering::SeqCst) {
            let report = Self::scan(&workers, config.heartbeat_timeout(), Utc::now()).await;
            if report.has_transitions() {
                info!(
                    "健康检查完成: {} 个Worker, {} 个健康, 新增UNHEALTHY {:?}, 新增OFFLINE {:?}",
                    report.checked, report.healthy, report.marked_unhealthy, report.marked_offline
                );
            } else {
                debug!(
                    "健康检查完成: {} 个Worker, {} 个健康",
                    report.checked, report.healthy
                );
            }

            let mut remaining = config.health_check_interval();
            while !remaining.is_zero() && running.load(Ordering::SeqCst) {
                let step = remaining.min(MAX_SLEEP_STEP);
                tokio::time::sleep(step).await;
                remaining -= step;
            }
        }

        info!("Worker健康检查循环已停止");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::registration;

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(RegistryConfig::default())
    }

    #[tokio::test]
    async fn test_register_requires_id() {
        let registry = registry();
        assert!(!registry.register(registration("", &[], 1)).await);
        assert!(!registry.register(registration("   ", &[], 1)).await);
        assert!(registry.list_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_entry() {
        let registry = registry();
        registry.register(registration("w1", &["exe"], 1)).await;
        registry.try_reserve_slot("w1").await;

        registry.register(registration("w1", &["pdf"], 4)).await;
        let worker = registry.get("w1").await.unwrap();
        assert_eq!(worker.max_tasks, 4);
        assert_eq!(worker.current_tasks, 0);
        assert!(worker.capabilities.contains("pdf"));
        assert_eq!(registry.list_all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_try_reserve_slot_respects_capacity() {
        let registry = registry();
        registry.register(registration("w1", &[], 2)).await;

        assert!(registry.try_reserve_slot("w1").await);
        assert!(registry.try_reserve_slot("w1").await);
        assert!(!registry.try_reserve_slot("w1").await);
        assert!(!registry.try_reserve_slot("missing").await);
        assert_eq!(registry.get("w1").await.unwrap().current_tasks, 2);
    }

    #[tokio::test]
    async fn test_snapshots_are_copies() {
        let registry = registry();
        registry.register(registration("w1", &[], 1)).await;

        let mut snapshot = registry.list_all().await;
        snapshot[0].current_tasks = 99;
        assert_eq!(registry.get("w1").await.unwrap().current_tasks, 0);
    }

    #[tokio::test]
    async fn test_health_monitor_start_stop_is_idempotent() {
        let registry = registry();
        registry.start_health_monitor().await;
        registry.start_health_monitor().await;
        assert!(registry.is_monitoring());

        let start = std::time::Instant::now();
        registry.stop_health_monitor().await;
        registry.stop_health_monitor().await;
        assert!(!registry.is_monitoring());
        assert!(start.elapsed() < Duration::from_secs(3));
    }
    async fn current_monitor_flag(registry: &WorkerRegistry) -> Arc<AtomicBool> {
        registry
            .monitor
            .lock()
            .await
            .as_ref()
            .map(|task| task.running.clone())
            .unwrap()
    }

    #[tokio::test]
    async fn test_restart_after_abandoned_monitor_uses_fresh_flag() {
        let registry = WorkerRegistry::new(RegistryConfig {
            join_timeout_seconds: 1,
            ..Default::default()
        });

        // 持有表锁让第一次扫描卡住，stop 因此等待超时并放弃该循环
        let table = registry.workers.lock().await;
        registry.start_health_monitor().await;
        let abandoned = current_monitor_flag(&registry).await;
        registry.stop_health_monitor().await;
        assert!(!abandoned.load(Ordering::SeqCst));

        registry.start_health_monitor().await;
        let current = current_monitor_flag(&registry).await;
        drop(table);

        assert!(!Arc::ptr_eq(&abandoned, &current));
        assert!(!abandoned.load(Ordering::SeqCst));
        assert!(current.load(Ordering::SeqCst));
        assert!(registry.is_monitoring());

        registry.stop_health_monitor().await;
    }
}
