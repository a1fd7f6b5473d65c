use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{Job, QueuedMessage};
use crate::OrchestratorResult;

/// 消息回调
///
/// 返回错误表示该条消息处理失败；后端记录日志后继续处理下一条，不会重试。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: QueuedMessage) -> OrchestratorResult<()>;
}

/// 将同步闭包适配为消息回调
pub struct FnMessageHandler<F> {
    func: F,
}

impl<F> FnMessageHandler<F>
where
    F: Fn(QueuedMessage) -> OrchestratorResult<()> + Send + Sync,
{
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> MessageHandler for FnMessageHandler<F>
where
    F: Fn(QueuedMessage) -> OrchestratorResult<()> + Send + Sync,
{
    async fn handle(&self, message: QueuedMessage) -> OrchestratorResult<()> {
        (self.func)(message)
    }
}

/// 队列后端抽象接口
///
/// 所有实现（内存、RabbitMQ、Redis Stream）遵循同一契约：
/// 失败以布尔值返回而不是传播错误，单个后端实例只有一个逻辑消费者。
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// 后端名称，用于日志与状态输出
    fn name(&self) -> &'static str;

    fn is_connected(&self) -> bool;

    /// 建立连接；幂等，已连接时重复调用直接返回true
    async fn connect(&self) -> bool;

    /// 释放资源；未连接时调用也是安全的。会在限定时间内等待内部消费任务退出
    async fn disconnect(&self);

    /// 入队；背压超时或未连接时返回false，调用方可自行重试
    async fn publish(&self, job: &Job, priority: i32) -> bool;

    /// 开始把消息投递给 `handler`，直到 `disconnect` 被调用
    ///
    /// 投递在后台任务中进行，本方法立即返回。`poll_timeout` 覆盖单次接收的等待时长（上限1秒）。
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        poll_timeout: Option<Duration>,
    ) -> bool;

    /// 尽力而为的当前队列深度，无法获取时返回0
    async fn queue_size(&self) -> usize;
}
