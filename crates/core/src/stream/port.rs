use crate::common::{CandleKey, Market};
use crate::stream::entity::ConnectionStatus;
use crate::stream::error::StreamError;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// # Summary
/// 单条上游物理连接（按市场维度）的订阅多路复用契约。
///
/// # Invariants
/// - 同一 Market 至多维持一条物理连接。
/// - 重复 subscribe 同一 streamName 是幂等的：替换句柄而不关闭连接。
/// - 连接异常断开时按线性退避自动重连，直到 `MAX_RECONNECT_ATTEMPTS`。
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// # Summary
    /// 订阅指定分区键的实时帧流。
    ///
    /// # Logic
    /// 1. 若该 Market 尚无物理连接，建立连接。
    /// 2. 注册 streamName 对应的帧投递通道。
    /// 3. 返回通道接收端，调用方在自己的任务中消费原始帧字节。
    ///
    /// # Arguments
    /// * `key`: 分区键。
    /// * `stream_name`: 上游流名称，如 `btcusdt@kline_15m`。
    ///
    /// # Returns
    /// 成功返回原始帧字节的接收端，失败返回 `StreamError`。
    async fn subscribe(
        &self,
        key: &CandleKey,
        stream_name: &str,
    ) -> Result<mpsc::Receiver<Vec<u8>>, StreamError>;

    /// # Summary
    /// 取消订阅指定分区键的流。
    ///
    /// # Logic
    /// 1. 移除该 streamName 的投递通道。
    /// 2. 若该 Market 连接已无任何订阅，关闭物理连接。
    ///
    /// # Arguments
    /// * `key`: 分区键。
    /// * `stream_name`: 上游流名称。
    async fn unsubscribe(&self, key: &CandleKey, stream_name: &str);

    /// # Summary
    /// 获取所有物理连接的当前状态快照。
    ///
    /// # Returns
    /// 每条物理连接的 open 状态及其挂载的订阅列表。
    async fn status(&self) -> Vec<ConnectionStatus>;

    /// # Summary
    /// 强制重新订阅（用于 HealthMonitor 检测到 stale 后触发）。
    ///
    /// # Arguments
    /// * `key`: 分区键。
    /// * `stream_name`: 上游流名称。
    async fn resubscribe(
        &self,
        key: &CandleKey,
        stream_name: &str,
    ) -> Result<mpsc::Receiver<Vec<u8>>, StreamError> {
        self.unsubscribe(key, stream_name).await;
        self.subscribe(key, stream_name).await
    }

    /// 返回该传输服务对应的市场分段
    fn market(&self) -> Market;
}
