use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Job;
use crate::OrchestratorResult;

/// 队列中传输的消息封装
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedMessage {
    pub priority: i32,
    pub enqueue_timestamp: DateTime<Utc>,
    pub job: Job,
}

impl QueuedMessage {
    pub fn new(job: Job, priority: i32) -> Self {
        Self {
            priority,
            enqueue_timestamp: Utc::now(),
            job,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }

    pub fn to_bytes(&self) -> OrchestratorResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> OrchestratorResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json(&self) -> OrchestratorResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> OrchestratorResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::priority;
    use crate::OrchestratorError;
    use serde_json::json;

    #[test]
    fn test_message_preserves_job_and_priority() {
        let job = Job::new("file_scan", json!("/srv/sample.exe"), priority::LOW, None)
            .with_required_capabilities(["exe"]);
        let message = QueuedMessage::new(job.clone(), priority::CRITICAL);

        let decoded = QueuedMessage::from_bytes(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.job, job);
        assert_eq!(decoded.priority, priority::CRITICAL);
        assert_eq!(decoded.job_id(), job.id);
    }

    #[test]
    fn test_garbage_body_is_serialization_error() {
        let err = QueuedMessage::from_bytes(b"\x00\x01garbage").unwrap_err();
        assert!(matches!(err, OrchestratorError::Serialization(_)));
    }
}
