use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use orchestrator_core::{
    DispatcherConfig, Job, JobDispatcher, OrchestratorError, OrchestratorResult, WorkerNode,
};

/// 通过HTTP POST把任务推送到Worker
///
/// 请求体为任务的JSON表示，目标地址为 `http://{host}:{port}{dispatch_path}`，非2xx视为失败。
#[derive(Debug, Clone)]
pub struct HttpJobDispatcher {
    client: Client,
    dispatch_path: String,
}

impl HttpJobDispatcher {
    pub fn new(dispatch_path: impl Into<String>, timeout: Duration) -> OrchestratorResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::Configuration(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self {
            client,
            dispatch_path: dispatch_path.into(),
        })
    }

    pub fn from_config(config: &DispatcherConfig) -> OrchestratorResult<Self> {
        Self::new(config.dispatch_path.clone(), config.dispatch_timeout())
    }

    pub fn endpoint(&self, worker: &WorkerNode) -> String {
        format!("http://{}{}", worker.address(), self.dispatch_path)
    }
}

#[async_trait]
impl JobDispatcher for HttpJobDispatcher {
    async fn dispatch(&self, worker: &WorkerNode, job: &Job) -> OrchestratorResult<()> {
        let endpoint = self.endpoint(worker);
        debug!("POST {} for job {}", endpoint, job.id);

        let response = self
            .client
            .post(&endpoint)
            .json(job)
            .send()
            .await
            .map_err(|e| {
                OrchestratorError::Dispatch(format!("发送任务 {} 到 {} 失败: {e}", job.id, endpoint))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(OrchestratorError::Dispatch(format!(
                "Worker {} 拒绝任务 {}: HTTP {}",
                worker.worker_id, job.id, status
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// 只记录日志的分发器，用于本地运行与演示
#[derive(Debug, Default, Clone)]
pub struct LoggingDispatcher;

#[async_trait]
impl JobDispatcher for LoggingDispatcher {
    async fn dispatch(&self, worker: &WorkerNode, job: &Job) -> OrchestratorResult<()> {
        info!(
            "Dispatching job {} ({}, priority {}) to worker {}",
            job.id, job.kind, job.priority, worker.worker_id
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}
