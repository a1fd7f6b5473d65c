pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use crate::config::{
    AppConfig, DispatcherConfig, LoggingConfig, NoWorkerPolicy, QueueBackendKind, QueueConfig,
    RabbitMqConfig, RedisStreamConfig, RegistryConfig,
};
pub use errors::*;
pub use logging::init_logging;
pub use models::{
    priority, Job, QueuedMessage, WorkerHeartbeat, WorkerLoad, WorkerNode, WorkerRegistration,
    WorkerStatus,
};
pub use traits::{FnMessageHandler, JobDispatcher, MessageHandler, QueueBackend};
