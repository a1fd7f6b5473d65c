use std::sync::Arc;

use tracing::{debug, info};

use orchestrator_core::{
    OrchestratorError, OrchestratorResult, QueueBackend, QueueBackendKind, QueueConfig,
};

use crate::in_memory_queue::{InMemoryQueueBackend, InMemoryQueueConfig};

/// 根据配置构造队列后端
pub struct QueueBackendFactory;

impl QueueBackendFactory {
    /// 构造后端但不连接
    ///
    /// 后端配置段缺失或无效时总是返回配置错误；配置有效但所选后端未被编译进来时，
    /// 记录警告并退回内存队列。
    pub fn create(config: &QueueConfig) -> OrchestratorResult<Arc<dyn QueueBackend>> {
        debug!("Creating queue backend: {}", config.backend.as_str());
        Self::validate_config(config)?;

        match config.backend {
            QueueBackendKind::Memory => Ok(Self::in_memory(config)),
            QueueBackendKind::Rabbitmq => Self::rabbitmq(config),
            QueueBackendKind::RedisStream => Self::redis_stream(config),
        }
    }

    fn in_memory(config: &QueueConfig) -> Arc<dyn QueueBackend> {
        info!("Initializing in-memory queue backend");
        Arc::new(InMemoryQueueBackend::with_config(
            InMemoryQueueConfig::from(config),
        ))
    }

    #[cfg(feature = "rabbitmq")]
    fn rabbitmq(config: &QueueConfig) -> OrchestratorResult<Arc<dyn QueueBackend>> {
        let rabbitmq = config.rabbitmq.clone().ok_or_else(missing_rabbitmq_section)?;
        info!("Initializing RabbitMQ queue backend");
        Ok(Arc::new(crate::rabbitmq_queue::RabbitMqQueueBackend::new(
            rabbitmq, config,
        )))
    }

    #[cfg(not(feature = "rabbitmq"))]
    fn rabbitmq(config: &QueueConfig) -> OrchestratorResult<Arc<dyn QueueBackend>> {
        tracing::warn!("RabbitMQ support not compiled in, falling back to in-memory queue");
        Ok(Self::in_memory(config))
    }

    #[cfg(feature = "redis")]
    fn redis_stream(config: &QueueConfig) -> OrchestratorResult<Arc<dyn QueueBackend>> {
        let redis = config.redis.clone().ok_or_else(missing_redis_section)?;
        info!("Initializing Redis Stream queue backend");
        Ok(Arc::new(
            crate::redis_stream_queue::RedisStreamQueueBackend::new(redis, config),
        ))
    }

    #[cfg(not(feature = "redis"))]
    fn redis_stream(config: &QueueConfig) -> OrchestratorResult<Arc<dyn QueueBackend>> {
        tracing::warn!("Redis support not compiled in, falling back to in-memory queue");
        Ok(Self::in_memory(config))
    }

    pub fn validate_config(config: &QueueConfig) -> OrchestratorResult<()> {
        config.validate()?;
        match config.backend {
            QueueBackendKind::Memory => {}
            QueueBackendKind::Rabbitmq => {
                let rabbitmq = config.rabbitmq.as_ref().ok_or_else(missing_rabbitmq_section)?;
                Self::check_url(&rabbitmq.url, &["amqp", "amqps"], "RabbitMQ")?;
                if rabbitmq.queue.is_empty() {
                    return Err(OrchestratorError::Configuration(
                        "RabbitMQ队列名不能为空".to_string(),
                    ));
                }
            }
            QueueBackendKind::RedisStream => {
                let redis = config.redis.as_ref().ok_or_else(missing_redis_section)?;
                Self::check_url(&redis.url, &["redis", "rediss"], "Redis")?;
                if redis.stream.is_empty() || redis.group.is_empty() {
                    return Err(OrchestratorError::Configuration(
                        "Redis stream与group名称不能为空".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_url(raw: &str, schemes: &[&str], label: &str) -> OrchestratorResult<()> {
        let parsed = url::Url::parse(raw)
            .map_err(|e| OrchestratorError::Configuration(format!("无效的{label} URL '{raw}': {e}")))?;
        if !schemes.contains(&parsed.scheme()) {
            return Err(OrchestratorError::Configuration(format!(
                "{label} URL必须以{}://开头",
                schemes.join(":// 或 ")
            )));
        }
        Ok(())
    }

    pub fn parse_kind(kind: &str) -> OrchestratorResult<QueueBackendKind> {
        match kind.to_lowercase().replace('-', "_").as_str() {
            "memory" | "in_memory" => Ok(QueueBackendKind::Memory),
            "rabbitmq" => Ok(QueueBackendKind::Rabbitmq),
            "redis_stream" | "redis" => Ok(QueueBackendKind::RedisStream),
            _ => Err(OrchestratorError::Configuration(format!(
                "不支持的队列后端: {kind}，支持的类型: memory, rabbitmq, redis_stream"
            ))),
        }
    }
}

fn missing_rabbitmq_section() -> OrchestratorError {
    OrchestratorError::Configuration("RabbitMQ配置缺失：需要提供[queue.rabbitmq]配置段".to_string())
}

fn missing_redis_section() -> OrchestratorError {
    OrchestratorError::Configuration("Redis Stream配置缺失：需要提供[queue.redis]配置段".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::{RabbitMqConfig, RedisStreamConfig};

    #[test]
    fn test_parse_kind() {
        assert_eq!(
            QueueBackendFactory::parse_kind("memory").unwrap(),
            QueueBackendKind::Memory
        );
        assert_eq!(
            QueueBackendFactory::parse_kind("In-Memory").unwrap(),
            QueueBackendKind::Memory
        );
        assert_eq!(
            QueueBackendFactory::parse_kind("RabbitMQ").unwrap(),
            QueueBackendKind::Rabbitmq
        );
        assert_eq!(
            QueueBackendFactory::parse_kind("redis").unwrap(),
            QueueBackendKind::RedisStream
        );
        assert!(QueueBackendFactory::parse_kind("kafka").is_err());
    }

    #[test]
    fn test_create_memory_backend() {
        let backend = QueueBackendFactory::create(&QueueConfig::default()).unwrap();
        assert_eq!(backend.name(), "memory");
        assert!(!backend.is_connected());
    }

    #[test]
    fn test_rejects_wrong_url_scheme() {
        let config = QueueConfig {
            backend: QueueBackendKind::Rabbitmq,
            rabbitmq: Some(RabbitMqConfig {
                url: "redis://localhost:6379".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = QueueBackendFactory::create(&config).err().unwrap();
        assert!(matches!(err, OrchestratorError::Configuration(_)));

        let config = QueueConfig {
            backend: QueueBackendKind::RedisStream,
            redis: Some(RedisStreamConfig {
                url: "not a url".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(QueueBackendFactory::create(&config).is_err());
    }

    #[test]
    fn test_missing_backend_section_is_configuration_error() {
        for backend in [QueueBackendKind::Rabbitmq, QueueBackendKind::RedisStream] {
            let config = QueueConfig {
                backend,
                ..Default::default()
            };
            let err = QueueBackendFactory::create(&config).err().unwrap();
            assert!(matches!(err, OrchestratorError::Configuration(_)));
            assert!(err.is_fatal());
        }
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_create_redis_backend() {
        let config = QueueConfig {
            backend: QueueBackendKind::RedisStream,
            redis: Some(RedisStreamConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let backend = QueueBackendFactory::create(&config).unwrap();
        assert_eq!(backend.name(), "redis_stream");
    }

    #[cfg(not(feature = "redis"))]
    #[test]
    fn test_redis_falls_back_to_memory_when_not_compiled() {
        let config = QueueConfig {
            backend: QueueBackendKind::RedisStream,
            redis: Some(RedisStreamConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let backend = QueueBackendFactory::create(&config).unwrap();
        assert_eq!(backend.name(), "memory");
    }
}
