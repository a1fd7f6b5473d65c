use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use orchestrator_core::{MessageHandler, QueuedMessage};

/// 单次接收等待的上限，保证关闭信号能被及时观察到
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// 回调panic后的退避时间
const PANIC_BACKOFF: Duration = Duration::from_millis(200);

pub(crate) fn effective_poll_interval(requested: Option<Duration>, default: Duration) -> Duration {
    requested
        .unwrap_or(default)
        .min(MAX_POLL_INTERVAL)
        .max(Duration::from_millis(1))
}

/// 把一条消息交给回调，返回是否处理成功
///
/// 回调返回错误或panic都不会中断消费循环。
pub(crate) async fn deliver(handler: &Arc<dyn MessageHandler>, message: QueuedMessage) -> bool {
    let job_id = message.job.id.clone();
    match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
        Ok(Ok(())) => {
            debug!("Message for job {} handled", job_id);
            true
        }
        Ok(Err(e)) => {
            error!("Handler failed for job {}: {}", job_id, e);
            false
        }
        Err(_) => {
            error!("Handler panicked while processing job {}", job_id);
            tokio::time::sleep(PANIC_BACKOFF).await;
            false
        }
    }
}

/// 停止标志 + 消费任务句柄，所有后端共用
#[derive(Debug, Default)]
pub(crate) struct ConsumerSlot {
    active: tokio::sync::Mutex<Option<ActiveConsumer>>,
}

/// 每个消费任务独占一个停止标志，被放弃的旧任务不会因重新启动而复活
#[derive(Debug)]
struct ActiveConsumer {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ConsumerSlot {
    /// 登记新的消费任务；已有活动消费者时返回false
    pub async fn start<F>(&self, spawn: F) -> bool
    where
        F: FnOnce(Arc<AtomicBool>) -> JoinHandle<()>,
    {
        let mut active = self.active.lock().await;
        if active
            .as_ref()
            .is_some_and(|consumer| !consumer.handle.is_finished())
        {
            warn!("Consumer already running, ignoring consume request");
            return false;
        }
        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn(running.clone());
        *active = Some(ActiveConsumer { running, handle });
        true
    }

    /// 发出停止信号并在限定时间内等待消费任务退出，超时则放弃等待
    pub async fn stop(&self, join_timeout: Duration) {
        let Some(consumer) = self.active.lock().await.take() else {
            return;
        };
        consumer.running.store(false, Ordering::SeqCst);
        match tokio::time::timeout(join_timeout, consumer.handle).await {
            Ok(Ok(())) => debug!("Consumer task exited"),
            Ok(Err(e)) => warn!("Consumer task ended abnormally: {}", e),
            Err(_) => warn!(
                "Consumer task did not exit within {:?}, abandoning it",
                join_timeout
            ),
        }
    }
}

/// 连续传输错误达到该次数即视为连接丢失
pub(crate) const MAX_TRANSPORT_FAILURES: u32 = 3;

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// 第 `attempt` 次重连前的等待时间，指数增长并封顶
pub(crate) fn reconnect_delay(attempt: u32) -> Duration {
    RECONNECT_BASE_DELAY
        .saturating_mul(1u32 << attempt.saturating_sub(1).min(6))
        .min(RECONNECT_MAX_DELAY)
}

/// 以不超过 [`MAX_POLL_INTERVAL`] 的步长等待；停止标志被清除时提前返回false
pub(crate) async fn pause(running: &AtomicBool, total: Duration) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(MAX_POLL_INTERVAL);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    running.load(Ordering::SeqCst)
}

/// Broker连接状态
///
/// 后端与其消费任务共享同一份状态：成功的操作清零错误计数，
/// 连续失败达到 [`MAX_TRANSPORT_FAILURES`] 或消费流结束时标记为断开，
/// 重新建立连接后恢复。
#[derive(Debug, Clone, Default)]
pub(crate) struct LinkState {
    connected: Arc<AtomicBool>,
    failures: Arc<AtomicU32>,
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn mark_connected(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
    }

    /// 主动断开，不计为连接丢失
    pub fn mark_closed(&self) {
        self.failures.store(0, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn mark_lost(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            warn!("Broker connection lost");
        }
    }

    pub fn record_success(&self) {
        self.failures.store(0, Ordering::SeqCst);
        if !self.connected.swap(true, Ordering::SeqCst) {
            info!("Broker connection restored");
        }
    }

    /// 记录一次传输错误，返回当前连续失败次数
    pub fn record_failure(&self) -> u32 {
        let failures = self.failures.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        if failures >= MAX_TRANSPORT_FAILURES {
            self.mark_lost();
        }
        failures
    }
}
