use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 平均处理时间指数移动平均的平滑系数
pub const PROCESSING_TIME_SMOOTHING: f64 = 0.1;

/// Worker健康状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerStatus {
    #[serde(rename = "HEALTHY")]
    Healthy,
    #[serde(rename = "UNHEALTHY")]
    Unhealthy,
    #[serde(rename = "OFFLINE")]
    Offline,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Healthy => "HEALTHY",
            WorkerStatus::Unhealthy => "UNHEALTHY",
            WorkerStatus::Offline => "OFFLINE",
        }
    }
}

/// 建议性的负载描述，不参与状态机
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerLoad {
    #[serde(rename = "IDLE")]
    Idle,
    #[serde(rename = "PROCESSING")]
    Processing,
}

/// 已注册的远程执行节点
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerNode {
    pub worker_id: String,
    pub host: String,
    pub port: u16,
    pub capabilities: BTreeSet<String>,
    pub status: WorkerStatus,
    pub current_tasks: u32,
    pub max_tasks: u32,
    pub last_heartbeat: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
    pub total_processed: u64,
    pub error_count: u64,
    /// 秒，指数移动平均
    pub average_processing_time: f64,
    /// 已合并的处理时间样本数，0表示尚无样本
    #[serde(default)]
    pub processing_samples: u64,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Worker注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    #[serde(default)]
    pub worker_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default = "default_max_tasks")]
    pub max_tasks: u32,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_max_tasks() -> u32 {
    1
}

/// Worker心跳，所有计数字段均为可选
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerHeartbeat {
    pub worker_id: String,
    #[serde(default)]
    pub current_tasks: Option<u32>,
    #[serde(default)]
    pub average_processing_time: Option<f64>,
    #[serde(default)]
    pub total_processed: Option<u64>,
    #[serde(default)]
    pub error_count: Option<u64>,
}

impl WorkerHeartbeat {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    pub fn with_current_tasks(mut self, current_tasks: u32) -> Self {
        self.current_tasks = Some(current_tasks);
        self
    }
}

impl WorkerNode {
    /// 根据注册请求创建节点，初始状态乐观地设为HEALTHY
    pub fn from_registration(registration: WorkerRegistration, now: DateTime<Utc>) -> Self {
        Self {
            worker_id: registration.worker_id,
            host: registration.host,
            port: registration.port,
            capabilities: registration.capabilities.into_iter().collect(),
            status: WorkerStatus::Healthy,
            current_tasks: 0,
            max_tasks: registration.max_tasks,
            last_heartbeat: now,
            registered_at: now,
            total_processed: 0,
            error_count: 0,
            average_processing_time: 0.0,
            processing_samples: 0,
            metadata: registration.metadata,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == WorkerStatus::Healthy
    }

    pub fn has_capacity(&self) -> bool {
        self.current_tasks < self.max_tasks
    }

    /// `current_tasks / max_tasks`，限制在 [0, 1]；`max_tasks == 0` 视为满载
    pub fn load_factor(&self) -> f64 {
        if self.max_tasks == 0 {
            return 1.0;
        }
        (self.current_tasks as f64 / self.max_tasks as f64).clamp(0.0, 1.0)
    }

    pub fn load_state(&self) -> WorkerLoad {
        if self.current_tasks == 0 {
            WorkerLoad::Idle
        } else {
            WorkerLoad::Processing
        }
    }

    /// 能力集合是否为要求集合的超集
    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_heartbeat
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 合并心跳携带的计数，并强制恢复为HEALTHY
    pub fn apply_heartbeat(&mut self, heartbeat: &WorkerHeartbeat, now: DateTime<Utc>) {
        self.last_heartbeat = now;
        self.status = WorkerStatus::Healthy;

        if let Some(current_tasks) = heartbeat.current_tasks {
            self.current_tasks = current_tasks;
        }
        if let Some(sample) = heartbeat.average_processing_time {
            self.average_processing_time = if self.processing_samples == 0 {
                sample
            } else {
                PROCESSING_TIME_SMOOTHING * sample
                    + (1.0 - PROCESSING_TIME_SMOOTHING) * self.average_processing_time
            };
            self.processing_samples += 1;
        }
        if let Some(total_processed) = heartbeat.total_processed {
            self.total_processed = total_processed;
        }
        if let Some(error_count) = heartbeat.error_count {
            self.error_count = error_count;
        }
    }
}
