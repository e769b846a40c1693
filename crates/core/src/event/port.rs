use crate::event::entity::{Event, Topic};
use tokio::sync::broadcast;

/// # Summary
/// 类型化发布/订阅契约。
///
/// # Invariants
/// - 发布不得阻塞发布者（句柄在有界通道上入队）。
/// - 同一主题对单个订阅者保证 FIFO；跨主题不保证顺序。
/// - 订阅者处理过慢时，最旧的事件被丢弃并计数，发布者不受影响。
pub trait EventBus: Send + Sync {
    /// # Summary
    /// 发布一个事件到其所属主题。
    ///
    /// # Logic
    /// 1. 根据 `event.topic()` 路由到对应的主题通道。
    /// 2. 向该通道入队；若无订阅者，事件被静默丢弃。
    ///
    /// # Arguments
    /// * `event`: 待发布的事件。
    fn publish(&self, event: Event);

    /// # Summary
    /// 订阅指定主题，获得一个广播接收端。
    ///
    /// # Arguments
    /// * `topic`: 目标主题。
    ///
    /// # Returns
    /// 该主题的广播接收端；滞后时返回 `RecvError::Lagged`，调用方应当继续接收下一条。
    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event>;
}
