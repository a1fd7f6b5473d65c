use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 约定俗成的优先级档位，数值越大越紧急；并非强制枚举
pub mod priority {
    pub const LOW: i32 = 1;
    pub const NORMAL: i32 = 5;
    pub const HIGH: i32 = 8;
    pub const CRITICAL: i32 = 10;
}

/// 提交时携带所需能力标签的元数据键
pub const REQUIRED_CAPABILITIES_KEY: &str = "required_capabilities";

/// 一次提交的扫描任务
///
/// `payload` 对编排器是不透明的（路径或内容句柄），核心从不解析它。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub submitted_at: DateTime<Utc>,
    /// 为空表示任意Worker均可执行
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// 因无可用Worker而重新入队的次数
    #[serde(default)]
    pub dispatch_attempts: u32,
}

impl Job {
    /// 创建新任务，生成全局唯一ID并记录提交时间
    ///
    /// 元数据中的 `required_capabilities`（字符串数组）会被提取为能力要求。
    pub fn new(
        kind: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        metadata: Option<HashMap<String, serde_json::Value>>,
    ) -> Self {
        let metadata = metadata.unwrap_or_default();
        let required_capabilities = metadata
            .get(REQUIRED_CAPABILITIES_KEY)
            .and_then(|value| value.as_array())
            .map(|tags| {
                tags.iter()
                    .filter_map(|tag| tag.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            priority,
            submitted_at: Utc::now(),
            required_capabilities,
            metadata,
            dispatch_attempts: 0,
        }
    }

    pub fn with_required_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn requires_capabilities(&self) -> bool {
        !self.required_capabilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_new_assigns_unique_ids() {
        let a = Job::new("file_scan", json!("/tmp/a"), priority::NORMAL, None);
        let b = Job::new("file_scan", json!("/tmp/a"), priority::NORMAL, None);
        assert_ne!(a.id, b.id);
        assert_eq!(a.dispatch_attempts, 0);
        assert!(!a.requires_capabilities());
    }

    #[test]
    fn test_job_extracts_capabilities_from_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert(REQUIRED_CAPABILITIES_KEY.to_string(), json!(["pdf", "ocr", 3]));
        metadata.insert("origin".to_string(), json!("upload"));

        let job = Job::new("file_scan", json!({"path": "/x.pdf"}), priority::HIGH, Some(metadata));

        let expected: BTreeSet<String> = ["ocr", "pdf"].iter().map(|s| s.to_string()).collect();
        assert_eq!(job.required_capabilities, expected);
        assert_eq!(job.metadata.get("origin"), Some(&json!("upload")));
    }

    #[test]
    fn test_job_deserializes_without_optional_fields() {
        let raw = json!({
            "id": "job-1",
            "kind": "file_scan",
            "payload": "/srv/data.bin",
            "priority": 10,
            "submitted_at": "2024-01-01T00:00:00Z"
        });
        let job: Job = serde_json::from_value(raw).unwrap();
        assert!(job.required_capabilities.is_empty());
        assert!(job.metadata.is_empty());
        assert_eq!(job.priority, priority::CRITICAL);
    }
}
