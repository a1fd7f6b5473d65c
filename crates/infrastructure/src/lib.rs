mod consumer;

pub mod http_dispatcher;
pub mod in_memory_queue;
pub mod queue_factory;
#[cfg(feature = "rabbitmq")]
pub mod rabbitmq_queue;
#[cfg(feature = "redis")]
pub mod redis_stream_queue;

pub use consumer::MAX_POLL_INTERVAL;
pub use http_dispatcher::{HttpJobDispatcher, LoggingDispatcher};
pub use in_memory_queue::{InMemoryQueueBackend, InMemoryQueueConfig};
pub use queue_factory::QueueBackendFactory;
#[cfg(feature = "rabbitmq")]
pub use rabbitmq_queue::RabbitMqQueueBackend;
#[cfg(feature = "redis")]
pub use redis_stream_queue::RedisStreamQueueBackend;
