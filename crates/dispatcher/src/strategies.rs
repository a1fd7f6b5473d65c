use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use orchestrator_core::{Job, WorkerNode};

/// Worker选择策略
///
/// 纯选择函数：调用方负责预先过滤出 HEALTHY 且仍有容量的Worker。
/// 只有在候选列表为空时才返回 `None`。
pub trait LoadBalancer: Send + Sync {
    fn select<'a>(&self, eligible: &'a [WorkerNode], job: Option<&Job>) -> Option<&'a WorkerNode>;

    fn name(&self) -> &str;
}

/// 返回负载因子最小的Worker，并列时取第一个
fn least_loaded<'a, I>(workers: I) -> Option<&'a WorkerNode>
where
    I: IntoIterator<Item = &'a WorkerNode>,
{
    workers.into_iter().min_by(|a, b| {
        a.load_factor()
            .partial_cmp(&b.load_factor())
            .unwrap_or(std::cmp::Ordering::Equal)
    })
}

#[derive(Debug, Default)]
pub struct LeastLoadStrategy;

impl LeastLoadStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for LeastLoadStrategy {
    fn select<'a>(&self, eligible: &'a [WorkerNode], _job: Option<&Job>) -> Option<&'a WorkerNode> {
        let selected = least_loaded(eligible);
        match selected {
            Some(worker) => debug!(
                "最小负载策略选择Worker: {} (负载: {:.2})",
                worker.worker_id,
                worker.load_factor()
            ),
            None => debug!("没有可用的Worker节点"),
        }
        selected
    }

    fn name(&self) -> &str {
        "least_load"
    }
}

/// 轮询策略，计数器跨调用共享且不重置
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinStrategy {
    fn select<'a>(&self, eligible: &'a [WorkerNode], _job: Option<&Job>) -> Option<&'a WorkerNode> {
        if eligible.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % eligible.len();
        let selected = &eligible[index];

        debug!(
            "轮询策略选择Worker: {} (索引: {}/{})",
            selected.worker_id,
            index,
            eligible.len()
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "round_robin"
    }
}

/// 能力匹配策略
///
/// 任务声明了 `required_capabilities` 时只在能力集合覆盖要求的Worker中按最小负载选择；
/// 没有任何Worker满足要求时退回到全部候选中的最小负载，不会因能力不满足而返回 `None`。
#[derive(Debug, Default)]
pub struct CapabilityMatchStrategy;

impl CapabilityMatchStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancer for CapabilityMatchStrategy {
    fn select<'a>(&self, eligible: &'a [WorkerNode], job: Option<&Job>) -> Option<&'a WorkerNode> {
        if eligible.is_empty() {
            debug!("没有可用的Worker节点");
            return None;
        }

        let Some(job) = job.filter(|job| job.requires_capabilities()) else {
            return least_loaded(eligible);
        };

        let matching = least_loaded(
            eligible
                .iter()
                .filter(|worker| worker.has_capabilities(&job.required_capabilities)),
        );

        match matching {
            Some(worker) => {
                debug!(
                    "能力匹配策略选择Worker: {} (要求: {:?})",
                    worker.worker_id, job.required_capabilities
                );
                Some(worker)
            }
            None => {
                warn!(
                    "没有Worker满足任务 {} 的能力要求 {:?}，退回最小负载选择",
                    job.id, job.required_capabilities
                );
                least_loaded(eligible)
            }
        }
    }

    fn name(&self) -> &str {
        "capability_match"
    }
}

pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    pub const DEFAULT_POLICY: &'static str = "least_load";

    /// 按名称创建策略；未知名称记录警告并退回最小负载策略
    pub fn from_name(name: &str) -> Arc<dyn LoadBalancer> {
        match name.trim().to_lowercase().replace('-', "_").as_str() {
            "least_load" => Arc::new(LeastLoadStrategy::new()),
            "round_robin" => Arc::new(RoundRobinStrategy::new()),
            "capability_match" => Arc::new(CapabilityMatchStrategy::new()),
            other => {
                warn!(
                    "未知的负载均衡策略 '{}'，使用默认策略 {}",
                    other,
                    Self::DEFAULT_POLICY
                );
                Arc::new(LeastLoadStrategy::new())
            }
        }
    }
}
