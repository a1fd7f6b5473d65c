//! 调度核心：负载均衡策略、Worker注册表与编排器

pub mod orchestrator;
pub mod strategies;
pub mod worker_registry;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod strategies_test;

pub use orchestrator::{DispatchStats, DispatchStatsSnapshot, Orchestrator, OrchestratorStatus};
pub use strategies::*;
pub use worker_registry::{HealthCheckReport, WorkerRegistry, UNHEALTHY_THRESHOLD_RATIO};
