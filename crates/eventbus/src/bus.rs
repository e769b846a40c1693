use dashmap::DashMap;
use klineflow_core::event::entity::{Event, Topic};
use klineflow_core::event::port::EventBus;
use tokio::sync::broadcast;
use tracing::warn;

const CHANNEL_CAPACITY: usize = 256;

/// # Summary
/// `EventBus` 的按主题广播实现，每个主题各自持有一条 `broadcast` 通道。
///
/// # Invariants
/// - 发布不阻塞：`broadcast::Sender::send` 在通道已满时丢弃最旧的事件而非等待。
/// - 一个主题尚无订阅者时发布会静默失败（`send` 返回 `Err`，被忽略）。
pub struct InMemoryEventBus {
    service: String,
    topics: DashMap<Topic, broadcast::Sender<Event>>,
}

impl InMemoryEventBus {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            topics: DashMap::new(),
        }
    }

    /// 返回该总线标注在所有事件信封上的服务名
    pub fn service(&self) -> &str {
        &self.service
    }

    fn sender_for(&self, topic: Topic) -> broadcast::Sender<Event> {
        self.topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// # Summary
    /// 订阅一个主题并在后台任务中消费，而不是把接收端交还给调用方。
    ///
    /// # Logic
    /// 1. 持续 `recv()`；收到 `Lagged(n)` 时记录告警并继续接收下一条，不中断任务。
    /// 2. 通道关闭（总线被销毁）时任务自然退出。
    ///
    /// # Arguments
    /// * `topic`: 目标主题。
    /// * `handler`: 在独立任务中对每个事件调用的回调，不得阻塞过久。
    pub fn subscribe_with_handler<F>(&self, topic: Topic, mut handler: F)
    where
        F: FnMut(Event) + Send + 'static,
    {
        let mut rx = self.sender_for(topic).subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(?topic, skipped = n, "event subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, event: Event) {
        let sender = self.sender_for(event.topic());
        let _ = sender.send(event);
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.sender_for(topic).subscribe()
    }
}
