use thiserror::Error;

/// 编排器错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("消息队列错误: {0}")]
    MessageQueue(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("任务分发错误: {0}")]
    Dispatch(String),

}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl OrchestratorError {
    /// 配置错误在构造阶段即为致命错误，其余错误均可在本地恢复
    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::Configuration(_))
    }
}

/// 统一的Result类型
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;
