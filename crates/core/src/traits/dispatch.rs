use async_trait::async_trait;

use crate::models::{Job, WorkerNode};
use crate::OrchestratorResult;

/// 把选中的任务交给选中的Worker（网络传输由实现决定）
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, worker: &WorkerNode, job: &Job) -> OrchestratorResult<()>;

    fn name(&self) -> &str;
}
