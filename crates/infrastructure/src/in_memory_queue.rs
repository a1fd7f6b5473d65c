use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

use orchestrator_core::{Job, MessageHandler, QueueBackend, QueueConfig, QueuedMessage};

use crate::consumer::{deliver, effective_poll_interval, ConsumerSlot};

/// 内存队列实现
///
/// 基于有界 tokio channel，严格FIFO，不按优先级重排。仅适用于单进程部署和测试。
#[derive(Debug)]
pub struct InMemoryQueueBackend {
    config: InMemoryQueueConfig,
    channels: RwLock<Option<QueueChannels>>,
    connected: AtomicBool,
    consumer: ConsumerSlot,
}

#[derive(Debug)]
struct QueueChannels {
    sender: mpsc::Sender<QueuedMessage>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedMessage>>>,
}

impl QueueChannels {
    fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }
}

#[derive(Debug, Clone)]
pub struct InMemoryQueueConfig {
    /// 队列容量上限，满时 publish 在 `publish_timeout` 内等待空位
    pub max_queue_size: usize,
    pub publish_timeout: Duration,
    pub poll_interval: Duration,
    pub join_timeout: Duration,
}

impl Default for InMemoryQueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 10_000,
            publish_timeout: Duration::from_secs(1),
            poll_interval: Duration::from_millis(500),
            join_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&QueueConfig> for InMemoryQueueConfig {
    fn from(config: &QueueConfig) -> Self {
        Self {
            max_queue_size: config.max_queue_size,
            publish_timeout: config.publish_timeout(),
            poll_interval: config.poll_interval(),
            join_timeout: config.join_timeout(),
        }
    }
}

impl Default for InMemoryQueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryQueueBackend {
    pub fn new() -> Self {
        Self::with_config(InMemoryQueueConfig::default())
    }

    pub fn with_config(config: InMemoryQueueConfig) -> Self {
        debug!("Creating in-memory queue with config: {:?}", config);
        Self {
            config,
            channels: RwLock::new(None),
            connected: AtomicBool::new(false),
            consumer: ConsumerSlot::default(),
        }
    }

    async fn consume_loop(
        receiver: Arc<Mutex<mpsc::Receiver<QueuedMessage>>>,
        handler: Arc<dyn MessageHandler>,
        running: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        let mut receiver = receiver.lock().await;
        debug!("In-memory consumer started, poll interval {:?}", poll_interval);

        while running.load(Ordering::SeqCst) {
            match tokio::time::timeout(poll_interval, receiver.recv()).await {
                Ok(Some(message)) => {
                    deliver(&handler, message).await;
                }
                Ok(None) => {
                    debug!("In-memory queue channel closed, consumer exiting");
                    break;
                }
                Err(_) => continue,
            }
        }

        debug!("In-memory consumer stopped");
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueueBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> bool {
        let mut channels = self.channels.write().await;
        if channels.is_none() {
            let (sender, receiver) = mpsc::channel(self.config.max_queue_size.max(1));
            *channels = Some(QueueChannels {
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            });
            info!(
                "In-memory queue ready (capacity {})",
                self.config.max_queue_size
            );
        }
        self.connected.store(true, Ordering::SeqCst);
        true
    }

    async fn disconnect(&self) {
        self.consumer.stop(self.config.join_timeout).await;

        if let Some(channels) = self.channels.write().await.take() {
            let remaining = channels.depth();
            if remaining > 0 {
                warn!("Discarding {} undelivered in-memory messages", remaining);
            }
            info!("In-memory queue closed");
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn publish(&self, job: &Job, priority: i32) -> bool {
        let sender = match self.channels.read().await.as_ref() {
            Some(channels) => channels.sender.clone(),
            None => {
                warn!("Cannot publish job {}: in-memory queue not connected", job.id);
                return false;
            }
        };

        let message = QueuedMessage::new(job.clone(), priority);
        match tokio::time::timeout(self.config.publish_timeout, sender.send(message)).await {
            Ok(Ok(())) => {
                debug!("Job {} enqueued (priority {})", job.id, priority);
                true
            }
            Ok(Err(_)) => {
                warn!("Cannot publish job {}: queue closed", job.id);
                false
            }
            Err(_) => {
                warn!(
                    "Queue full, job {} not enqueued within {:?}",
                    job.id, self.config.publish_timeout
                );
                false
            }
        }
    }

    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        poll_timeout: Option<Duration>,
    ) -> bool {
        if !self.is_connected() {
            warn!("Cannot consume: in-memory queue not connected");
            return false;
        }

        let receiver = match self.channels.read().await.as_ref() {
            Some(channels) => channels.receiver.clone(),
            None => return false,
        };
        let poll_interval = effective_poll_interval(poll_timeout, self.config.poll_interval);

        self.consumer
            .start(|running| {
                tokio::spawn(Self::consume_loop(receiver, handler, running, poll_interval))
            })
            .await
    }

    async fn queue_size(&self) -> usize {
        self.channels
            .read()
            .await
            .as_ref()
            .map(QueueChannels::depth)
            .unwrap_or(0)
    }
}
