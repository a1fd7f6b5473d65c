//! 测试辅助：Worker描述构造与记录调用的分发器

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use orchestrator_core::{
    Job, JobDispatcher, OrchestratorError, OrchestratorResult, WorkerNode, WorkerRegistration,
    WorkerStatus,
};

pub fn registration(worker_id: &str, capabilities: &[&str], max_tasks: u32) -> WorkerRegistration {
    WorkerRegistration {
        worker_id: worker_id.to_string(),
        host: "127.0.0.1".to_string(),
        port: 9100,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        max_tasks,
        metadata: HashMap::new(),
    }
}

/// 直接构造一个处于指定负载的健康Worker快照
pub fn worker(worker_id: &str, capabilities: &[&str], current_tasks: u32, max_tasks: u32) -> WorkerNode {
    let mut node = WorkerNode::from_registration(
        registration(worker_id, capabilities, max_tasks),
        Utc::now(),
    );
    node.current_tasks = current_tasks;
    node.status = WorkerStatus::Healthy;
    node
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRecord {
    pub worker_id: String,
    pub job_id: String,
    pub priority: i32,
}

/// 记录每次分发调用的分发器，可切换为失败模式
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<DispatchRecord>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<DispatchRecord> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(&self, worker: &WorkerNode, job: &Job) -> OrchestratorResult<()> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(DispatchRecord {
                worker_id: worker.worker_id.clone(),
                job_id: job.id.clone(),
                priority: job.priority,
            });
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(OrchestratorError::Dispatch(format!(
                "模拟分发失败: {}",
                job.id
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
