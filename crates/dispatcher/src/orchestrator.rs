use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use orchestrator_core::{
    DispatcherConfig, Job, JobDispatcher, MessageHandler, NoWorkerPolicy, OrchestratorResult,
    QueueBackend, QueuedMessage, WorkerNode,
};

use crate::strategies::LoadBalancer;
use crate::worker_registry::WorkerRegistry;

/// 分发统计，同时写入 `metrics` 门面
#[derive(Debug, Default)]
pub struct DispatchStats {
    submitted: AtomicU64,
    dispatched: AtomicU64,
    dispatch_failures: AtomicU64,
    dropped: AtomicU64,
    requeued: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatsSnapshot {
    pub submitted: u64,
    pub dispatched: u64,
    pub dispatch_failures: u64,
    pub dropped: u64,
    pub requeued: u64,
}

impl DispatchStats {
    fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("orchestrator_jobs_submitted_total").increment(1);
    }

    fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("orchestrator_jobs_dispatched_total").increment(1);
    }

    fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("orchestrator_dispatch_failures_total").increment(1);
    }

    fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("orchestrator_jobs_dropped_total").increment(1);
    }

    fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("orchestrator_jobs_requeued_total").increment(1);
    }

    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }
}

/// 供监控方轮询的只读汇总
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub backend: String,
    pub backend_connected: bool,
    pub queue_size: usize,
    pub total_workers: usize,
    pub healthy_workers: usize,
    pub workers: Vec<WorkerNode>,
    pub load_balancing_policy: String,
    pub no_worker_policy: String,
    pub stats: DispatchStatsSnapshot,
}

/// 编排器：提交 → 队列 → 消费 → 选择Worker → 分发
pub struct Orchestrator {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<WorkerRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    dispatcher: Arc<dyn JobDispatcher>,
    config: DispatcherConfig,
    stats: Arc<DispatchStats>,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        registry: Arc<WorkerRegistry>,
        balancer: Arc<dyn LoadBalancer>,
        dispatcher: Arc<dyn JobDispatcher>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            balancer,
            dispatcher,
            config,
            stats: Arc::new(DispatchStats::default()),
            running: AtomicBool::new(false),
        }
    }

    pub fn registry(&self) -> Arc<WorkerRegistry> {
        self.registry.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 连接队列、启动健康检查与消费循环
    ///
    /// 任一步失败都会调用 `stop()` 回收已启动的部分并返回false。
    pub async fn start(&self) -> bool {
        if self.is_running() {
            debug!("编排器已在运行");
            return true;
        }

        info!(
            "启动编排器 (队列后端: {}, 策略: {}, 分发器: {})",
            self.backend.name(),
            self.balancer.name(),
            self.dispatcher.name()
        );

        if !self.backend.connect().await {
            error!("连接队列后端 {} 失败", self.backend.name());
            self.stop().await;
            return false;
        }

        self.registry.start_health_monitor().await;

        let handler = Arc::new(DispatchHandler {
            backend: self.backend.clone(),
            registry: self.registry.clone(),
            balancer: self.balancer.clone(),
            dispatcher: self.dispatcher.clone(),
            config: self.config.clone(),
            stats: self.stats.clone(),
        });
        if !self.backend.consume(handler, None).await {
            error!("启动消费循环失败");
            self.stop().await;
            return false;
        }

        self.running.store(true, Ordering::SeqCst);
        info!("编排器已启动");
        true
    }

    /// 尽力而为的关闭，各步骤相互独立
    pub async fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        info!("停止编排器");

        self.registry.stop_health_monitor().await;
        self.backend.disconnect().await;

        if was_running {
            info!("编排器已停止");
        }
    }

    /// 提交任务；入队失败时返回 `None`，调用方可重试
    pub async fn submit(
        &self,
        kind: &str,
        payload: serde_json::Value,
        priority: i32,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Option<String> {
        let job = Job::new(kind, payload, priority, metadata);

        if self.backend.publish(&job, priority).await {
            self.stats.record_submitted();
            debug!("任务 {} ({}) 已提交，优先级 {}", job.id, job.kind, priority);
            Some(job.id)
        } else {
            warn!("任务 {} ({}) 未被队列接受", job.id, job.kind);
            None
        }
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let workers = self.registry.list_all().await;
        let healthy_workers = workers.iter().filter(|w| w.is_healthy()).count();

        OrchestratorStatus {
            running: self.is_running(),
            backend: self.backend.name().to_string(),
            backend_connected: self.backend.is_connected(),
            queue_size: self.backend.queue_size().await,
            total_workers: workers.len(),
            healthy_workers,
            workers,
            load_balancing_policy: self.balancer.name().to_string(),
            no_worker_policy: self.config.no_worker_policy.as_str().to_string(),
            stats: self.stats.snapshot(),
        }
    }
}

/// 消费回调：为每条消息选择Worker并分发
///
/// 在后端的单一消费任务中串行执行，分发延迟直接决定吞吐。
struct DispatchHandler {
    backend: Arc<dyn QueueBackend>,
    registry: Arc<WorkerRegistry>,
    balancer: Arc<dyn LoadBalancer>,
    dispatcher: Arc<dyn JobDispatcher>,
    config: DispatcherConfig,
    stats: Arc<DispatchStats>,
}

#[async_trait]
impl MessageHandler for DispatchHandler {
    async fn handle(&self, message: QueuedMessage) -> OrchestratorResult<()> {
        let QueuedMessage { priority, job, .. } = message;

        let eligible: Vec<WorkerNode> = self
            .registry
            .list_healthy()
            .await
            .into_iter()
            .filter(WorkerNode::has_capacity)
            .collect();

        let Some(worker) = self.balancer.select(&eligible, Some(&job)).cloned() else {
            self.handle_no_worker(job, priority);
            return Ok(());
        };

        // 快照之后Worker可能已被占满
        if !self.registry.try_reserve_slot(&worker.worker_id).await {
            debug!("Worker {} 在选择后已无空闲槽位", worker.worker_id);
            self.handle_no_worker(job, priority);
            return Ok(());
        }

        match self.dispatcher.dispatch(&worker, &job).await {
            Ok(()) => {
                self.stats.record_dispatched();
                info!(
                    "任务 {} ({}) 已分发到Worker {}",
                    job.id, job.kind, worker.worker_id
                );
                Ok(())
            }
            Err(e) => {
                self.stats.record_dispatch_failure();
                error!(
                    "分发任务 {} 到Worker {} 失败: {}",
                    job.id, worker.worker_id, e
                );
                Err(e)
            }
        }
    }
}

impl DispatchHandler {
    fn handle_no_worker(&self, mut job: Job, priority: i32) {
        match self.config.no_worker_policy {
            NoWorkerPolicy::Drop => {
                warn!("没有可用Worker，丢弃任务 {} ({})", job.id, job.kind);
                self.stats.record_dropped();
            }
            NoWorkerPolicy::Requeue if job.dispatch_attempts < self.config.requeue_max_attempts => {
                job.dispatch_attempts += 1;
                let delay = self.config.requeue_backoff() * job.dispatch_attempts;
                info!(
                    "没有可用Worker，任务 {} 将在 {:?} 后重新入队 (第{}次)",
                    job.id, delay, job.dispatch_attempts
                );

                let backend = self.backend.clone();
                let stats = self.stats.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if backend.publish(&job, priority).await {
                        stats.record_requeued();
                    } else {
                        warn!("任务 {} 重新入队失败，已丢弃", job.id);
                        stats.record_dropped();
                    }
                });
            }
            NoWorkerPolicy::Requeue => {
                warn!(
                    "任务 {} 已重试 {} 次仍无可用Worker，丢弃",
                    job.id, job.dispatch_attempts
                );
                self.stats.record_dropped();
            }
        }
    }
}
