use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::streams::StreamReadReply;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use orchestrator_core::{
    Job, MessageHandler, OrchestratorError, OrchestratorResult, QueueBackend, QueueConfig,
    QueuedMessage, RedisStreamConfig,
};

use crate::consumer::{
    deliver, effective_poll_interval, pause, reconnect_delay, ConsumerSlot, LinkState,
};

/// 消息体在流条目中的字段名
pub const PAYLOAD_FIELD: &str = "payload";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// 必须大于阻塞读取的最长时间
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis Streams队列实现
///
/// 使用消费者组读取；条目按写入顺序投递（不支持优先级），无论回调成功与否都会XACK。
/// 连接由 `ConnectionManager` 维护，断线后在下一条命令时自动重连；
/// Redis重启丢失消费者组时由消费任务重新创建。
pub struct RedisStreamQueueBackend {
    config: RedisStreamConfig,
    consumer_name: String,
    publish_timeout: Duration,
    poll_interval: Duration,
    join_timeout: Duration,
    session: RwLock<Option<Session>>,
    link: LinkState,
    consumer: ConsumerSlot,
}

struct Session {
    client: Client,
    connection: ConnectionManager,
}

impl RedisStreamQueueBackend {
    pub fn new(config: RedisStreamConfig, queue_config: &QueueConfig) -> Self {
        let consumer_name = config.consumer.clone().unwrap_or_else(default_consumer_name);
        Self {
            config,
            consumer_name,
            publish_timeout: queue_config.publish_timeout(),
            poll_interval: queue_config.poll_interval(),
            join_timeout: queue_config.join_timeout(),
            session: RwLock::new(None),
            link: LinkState::default(),
            consumer: ConsumerSlot::default(),
        }
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    async fn open_session(&self) -> OrchestratorResult<Session> {
        let client = Client::open(self.config.url.as_str()).map_err(|e| {
            OrchestratorError::Configuration(format!("无效的Redis URL {}: {e}", self.config.url))
        })?;

        let mut connection = open_manager(&client).await?;
        ensure_group(&mut connection, &self.config.stream, &self.config.group, "$").await?;

        Ok(Session { client, connection })
    }

    async fn connection(&self) -> Option<ConnectionManager> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.connection.clone())
    }

    fn record<T>(&self, result: &RedisResult<T>) {
        match result {
            Ok(_) => self.link.record_success(),
            Err(_) => {
                self.link.record_failure();
            }
        }
    }

    async fn consume_loop(
        mut connection: ConnectionManager,
        target: ReadTarget,
        link: LinkState,
        handler: Arc<dyn MessageHandler>,
        running: Arc<AtomicBool>,
        poll_interval: Duration,
    ) {
        let block_ms = poll_interval.as_millis().max(1) as u64;

        while running.load(Ordering::SeqCst) {
            let reply: RedisResult<Option<StreamReadReply>> = redis::cmd("XREADGROUP")
                .arg("GROUP")
                .arg(&target.group)
                .arg(&target.consumer)
                .arg("COUNT")
                .arg(1)
                .arg("BLOCK")
                .arg(block_ms)
                .arg("STREAMS")
                .arg(&target.stream)
                .arg(">")
                .query_async(&mut connection)
                .await;

            let reply = match reply {
                Ok(reply) => {
                    link.record_success();
                    match reply {
                        Some(reply) => reply,
                        None => continue,
                    }
                }
                Err(e) if is_missing_group(&e) => {
                    // 服务端数据被清空：从头重建消费者组，重启后写入的条目不会被跳过
                    warn!(
                        "Consumer group {} missing on {}, recreating",
                        target.group, target.stream
                    );
                    if let Err(e) =
                        ensure_group(&mut connection, &target.stream, &target.group, "0").await
                    {
                        error!("{}", e);
                        let failures = link.record_failure();
                        pause(&running, reconnect_delay(failures)).await;
                    }
                    continue;
                }
                Err(e) => {
                    let failures = link.record_failure();
                    let delay = reconnect_delay(failures);
                    error!(
                        "XREADGROUP on {} failed ({} in a row): {}, retrying in {:?}",
                        target.stream, failures, e, delay
                    );
                    pause(&running, delay).await;
                    continue;
                }
            };

            for entry in reply.keys.into_iter().flat_map(|key| key.ids) {
                match entry.get::<String>(PAYLOAD_FIELD) {
                    Some(payload) => match QueuedMessage::from_json(&payload) {
                        Ok(message) => {
                            deliver(&handler, message).await;
                        }
                        Err(e) => warn!("Discarding malformed stream entry {}: {}", entry.id, e),
                    },
                    None => warn!(
                        "Discarding stream entry {} without {} field",
                        entry.id, PAYLOAD_FIELD
                    ),
                }

                let acked: RedisResult<i64> = redis::cmd("XACK")
                    .arg(&target.stream)
                    .arg(&target.group)
                    .arg(&entry.id)
                    .query_async(&mut connection)
                    .await;
                if let Err(e) = acked {
                    error!("XACK {} failed: {}", entry.id, e);
                    link.record_failure();
                }
            }
        }

        debug!("Redis stream consumer {} stopped", target.consumer);
    }
}

struct ReadTarget {
    stream: String,
    group: String,
    consumer: String,
}

async fn open_manager(client: &Client) -> OrchestratorResult<ConnectionManager> {
    let config = ConnectionManagerConfig::new()
        .set_connection_timeout(CONNECT_TIMEOUT)
        .set_response_timeout(RESPONSE_TIMEOUT);

    tokio::time::timeout(
        CONNECT_TIMEOUT,
        client.get_connection_manager_with_config(config),
    )
    .await
    .map_err(|_| OrchestratorError::MessageQueue("连接Redis超时".to_string()))?
    .map_err(|e| OrchestratorError::MessageQueue(format!("连接Redis失败: {e}")))
}

/// 创建消费者组（`MKSTREAM`），已存在时忽略
async fn ensure_group(
    connection: &mut ConnectionManager,
    stream: &str,
    group: &str,
    start_id: &str,
) -> OrchestratorResult<()> {
    let result: RedisResult<String> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(stream)
        .arg(group)
        .arg(start_id)
        .arg("MKSTREAM")
        .query_async(connection)
        .await;

    match result {
        Ok(_) => {
            info!("Created consumer group {} on stream {}", group, stream);
            Ok(())
        }
        Err(e) if e.to_string().contains("BUSYGROUP") => {
            debug!("Consumer group {} already exists", group);
            Ok(())
        }
        Err(e) => Err(OrchestratorError::MessageQueue(format!(
            "创建消费者组 {group} 失败: {e}"
        ))),
    }
}

fn is_missing_group(error: &RedisError) -> bool {
    error.to_string().contains("NOGROUP")
}

fn default_consumer_name() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "orchestrator".to_string());
    format!("{}-{}", host, std::process::id())
}

#[async_trait]
impl QueueBackend for RedisStreamQueueBackend {
    fn name(&self) -> &'static str {
        "redis_stream"
    }

    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    async fn connect(&self) -> bool {
        let mut session = self.session.write().await;
        if session.is_some() {
            return true;
        }

        match self.open_session().await {
            Ok(opened) => {
                *session = Some(opened);
                self.link.mark_connected();
                info!(
                    "Connected to Redis stream {} as {}",
                    self.config.stream, self.consumer_name
                );
                true
            }
            Err(e) => {
                error!("{}", e);
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.consumer.stop(self.join_timeout).await;

        if self.session.write().await.take().is_some() {
            info!("Redis stream connection closed");
        }
        self.link.mark_closed();
    }

    async fn publish(&self, job: &Job, priority: i32) -> bool {
        let Some(mut connection) = self.connection().await else {
            warn!("Cannot publish job {}: Redis not connected", job.id);
            return false;
        };

        let payload = match QueuedMessage::new(job.clone(), priority).to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize job {}: {}", job.id, e);
                return false;
            }
        };

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.config.stream)
            .arg("*")
            .arg(PAYLOAD_FIELD)
            .arg(payload);

        match tokio::time::timeout(
            self.publish_timeout,
            cmd.query_async::<String>(&mut connection),
        )
        .await
        {
            Ok(result) => {
                self.record(&result);
                match result {
                    Ok(entry_id) => {
                        debug!("Job {} appended as stream entry {}", job.id, entry_id);
                        true
                    }
                    Err(e) => {
                        error!("XADD for job {} failed: {}", job.id, e);
                        false
                    }
                }
            }
            Err(_) => {
                warn!("XADD for job {} timed out", job.id);
                self.link.record_failure();
                false
            }
        }
    }

    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        poll_timeout: Option<Duration>,
    ) -> bool {
        // 阻塞读取占用连接，消费者使用独立连接
        let client = match self.session.read().await.as_ref() {
            Some(session) => session.client.clone(),
            None => {
                warn!("Cannot consume: Redis not connected");
                return false;
            }
        };
        let connection = match open_manager(&client).await {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to open consumer connection: {}", e);
                return false;
            }
        };

        let target = ReadTarget {
            stream: self.config.stream.clone(),
            group: self.config.group.clone(),
            consumer: self.consumer_name.clone(),
        };
        let poll_interval = effective_poll_interval(poll_timeout, self.poll_interval);
        let link = self.link.clone();

        self.consumer
            .start(|running| {
                tokio::spawn(Self::consume_loop(
                    connection,
                    target,
                    link,
                    handler,
                    running,
                    poll_interval,
                ))
            })
            .await
    }

    async fn queue_size(&self) -> usize {
        let Some(mut connection) = self.connection().await else {
            return 0;
        };

        let length: RedisResult<usize> = redis::cmd("XLEN")
            .arg(&self.config.stream)
            .query_async(&mut connection)
            .await;
        self.record(&length);
        length.unwrap_or_else(|e| {
            debug!("XLEN {} failed: {}", self.config.stream, e);
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;
    use serde_json::json;

    fn backend() -> RedisStreamQueueBackend {
        RedisStreamQueueBackend::new(
            RedisStreamConfig {
                url: "redis://127.0.0.1:6379".to_string(),
                ..Default::default()
            },
            &QueueConfig::default(),
        )
    }

    #[test]
    fn test_consumer_name_defaults_to_host_and_pid() {
        let backend =
            RedisStreamQueueBackend::new(RedisStreamConfig::default(), &QueueConfig::default());
        assert!(backend
            .consumer_name()
            .ends_with(&format!("-{}", std::process::id())));
    }

    #[test]
    fn test_configured_consumer_name_is_kept() {
        let config = RedisStreamConfig {
            consumer: Some("scanner-a".to_string()),
            ..Default::default()
        };
        let backend = RedisStreamQueueBackend::new(config, &QueueConfig::default());
        assert_eq!(backend.consumer_name(), "scanner-a");
    }

    #[test]
    fn test_missing_group_is_detected() {
        let missing = RedisError::from((
            ErrorKind::ResponseError,
            "NOGROUP",
            "No such key 'scan_jobs' or consumer group 'orchestrator'".to_string(),
        ));
        let other = RedisError::from((ErrorKind::IoError, "connection refused"));
        assert!(is_missing_group(&missing));
        assert!(!is_missing_group(&other));
    }

    #[tokio::test]
    async fn test_repeated_command_failures_report_disconnected() {
        let backend = backend();
        backend.link.mark_connected();

        let failed: RedisResult<usize> =
            Err(RedisError::from((ErrorKind::IoError, "broken pipe")));
        backend.record(&failed);
        backend.record(&failed);
        assert!(backend.is_connected());
        backend.record(&failed);
        assert!(!backend.is_connected());

        backend.record(&Ok(3usize));
        assert!(backend.is_connected());
    }

    #[tokio::test]
    async fn test_operations_fail_softly_when_not_connected() {
        let backend = backend();
        let job = Job::new("file_scan", json!("/a"), 5, None);

        assert!(!backend.publish(&job, 5).await);
        assert_eq!(backend.queue_size().await, 0);
        backend.disconnect().await;
        assert!(!backend.is_connected());
    }
}
