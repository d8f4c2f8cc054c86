use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::SchedulerResult;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info};

/// 批量拉取消费的队列监听者
#[async_trait]
pub trait QueueConsumer: Send + Sync {
    fn queue_name(&self) -> &str;

    /// 拉取并处理一批消息，返回本批消息数
    async fn process_batch(&self) -> SchedulerResult<usize>;
}

/// 监听循环
///
/// 队列为空或拉取失败时等待 `poll_interval`，收到关闭信号后退出。
/// `running` 只反映循环是否在运行。
pub async fn listen_queue(
    consumer: &dyn QueueConsumer,
    running: &Arc<RwLock<bool>>,
    poll_interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    *running.write().await = true;
    info!("开始监听队列: {}", consumer.queue_name());

    loop {
        let consumed = match consumer.process_batch().await {
            Ok(consumed) => consumed,
            Err(e) => {
                error!("从队列 {} 消费消息时出错: {}", consumer.queue_name(), e);
                0
            }
        };

        if consumed == 0 {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown_rx.recv() => break,
            }
        } else if !matches!(
            shutdown_rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ) {
            break;
        }
    }

    *running.write().await = false;
    info!("队列 {} 的监听已停止", consumer.queue_name());
}
