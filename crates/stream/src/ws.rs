use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use klineflow_core::common::{CandleKey, Market};
use klineflow_core::stream::entity::ConnectionStatus;
use klineflow_core::stream::error::StreamError;
use klineflow_core::stream::port::StreamTransport;
use serde_json::Value;
use std::sync::{Arc, OnceLock, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, broadcast, mpsc};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// # Summary
/// 传输层生命周期事件，供上层（Aggregator/HealthMonitor）中继到 EventBus。
///
/// # Invariants
/// - `ReconnectFailed` 仅在连续失败次数超过 `max_reconnect_attempts` 时发出一次。
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    ReconnectFailed { stream_name: String },
    Reconnected { stream_name: String },
}

/// # Summary
/// 单个市场分段（SPOT 或 FUTURES）的 WebSocket 多路复用传输实现。
///
/// # Invariants
/// - 同一 Market 至多维持一条物理连接；多个 streamName 共享该连接。
/// - 重连采用线性退避：`RECONNECT_INTERVAL × (attempt+1)`，超过上限后标记 FAILED。
pub struct WsTransport {
    market: Market,
    ws_base_url: String,
    reconnect_interval_ms: u64,
    max_reconnect_attempts: u32,
    // streamName -> 帧投递通道
    subscriptions: Arc<DashMap<String, mpsc::Sender<Vec<u8>>>>,
    // 物理连接读取任务是否已启动
    started: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
    // 唤醒读取任务以应用新的订阅集合（触发重连）
    resubscribe_notify: Arc<Notify>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    // 指向自身的弱引用，使 `&self` 方法能够在需要时升级为 Arc 以 spawn 后台任务
    self_weak: OnceLock<Weak<WsTransport>>,
}

impl WsTransport {
    pub fn new(
        market: Market,
        ws_base_url: impl Into<String>,
        reconnect_interval_ms: u64,
        max_reconnect_attempts: u32,
    ) -> Arc<Self> {
        let (lifecycle_tx, _rx) = broadcast::channel(64);
        let transport = Arc::new(Self {
            market,
            ws_base_url: ws_base_url.into(),
            reconnect_interval_ms,
            max_reconnect_attempts,
            subscriptions: Arc::new(DashMap::new()),
            started: Arc::new(AtomicBool::new(false)),
            open: Arc::new(AtomicBool::new(false)),
            resubscribe_notify: Arc::new(Notify::new()),
            lifecycle_tx,
            self_weak: OnceLock::new(),
        });
        // OnceLock::set never fails here: this is the only write, immediately
        // after construction, before any other reference to `transport` exists.
        let _ = transport.self_weak.set(Arc::downgrade(&transport));
        transport
    }

    /// 订阅传输层生命周期事件（重连失败/恢复）
    pub fn lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    fn build_url(&self) -> String {
        let streams = self
            .subscriptions
            .iter()
            .map(|e| e.key().clone())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/stream?streams={}", self.ws_base_url, streams)
    }

    fn ensure_reader_task(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            self.resubscribe_notify.notify_one();
            return;
        }
        let Some(this) = self.self_weak.get().and_then(Weak::upgrade) else {
            return;
        };
        tokio::spawn(async move {
            this.run().await;
        });
    }

    async fn run(self: Arc<Self>) {
        let mut attempts: u32 = 0;
        loop {
            if self.subscriptions.is_empty() {
                tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
                if self.subscriptions.is_empty() {
                    continue;
                }
            }

            let url = self.build_url();
            match connect_async(&url).await {
                Ok((mut ws, _response)) => {
                    info!(market = %self.market, %url, "stream connected");
                    self.open.store(true, Ordering::SeqCst);
                    attempts = 0;
                    self.read_until_reconnect_needed(&mut ws).await;
                    self.open.store(false, Ordering::SeqCst);
                    let _ = ws.close(None).await;
                }
                Err(e) => {
                    warn!(market = %self.market, error = %e, "stream connect failed");
                }
            }

            attempts += 1;
            if attempts > self.max_reconnect_attempts {
                warn!(market = %self.market, attempts, "reconnect attempts exhausted");
                for entry in self.subscriptions.iter() {
                    let _ = self.lifecycle_tx.send(LifecycleEvent::ReconnectFailed {
                        stream_name: entry.key().clone(),
                    });
                }
                attempts = 0;
                // Wait for an explicit resubscribe before trying again.
                self.resubscribe_notify.notified().await;
                continue;
            }

            let delay = backoff_delay_ms(self.reconnect_interval_ms, attempts);
            tokio::time::sleep(tokio::time::Duration::from_millis(delay)).await;
        }
    }

    async fn read_until_reconnect_needed(
        &self,
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        loop {
            tokio::select! {
                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => self.dispatch(text.as_bytes()),
                        Some(Ok(Message::Binary(bytes))) => self.dispatch(&bytes),
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(market = %self.market, "stream closed by peer");
                            return;
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            warn!(market = %self.market, error = %e, "stream read error");
                            return;
                        }
                    }
                }
                _ = self.resubscribe_notify.notified() => {
                    debug!(market = %self.market, "resubscription changed, reconnecting");
                    return;
                }
            }
        }
    }

    fn dispatch(&self, body: &[u8]) {
        let Ok(root) = serde_json::from_slice::<Value>(body) else {
            warn!(market = %self.market, "malformed JSON frame dropped");
            return;
        };

        let stream_name = root
            .get("stream")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| synthesize_stream_name(&root));

        let Some(stream_name) = stream_name else {
            warn!(market = %self.market, "could not determine stream name, frame dropped");
            return;
        };

        if let Some(sender) = self.subscriptions.get(&stream_name)
            && sender.try_send(body.to_vec()).is_err()
        {
            warn!(%stream_name, "frame handler channel full or closed, frame dropped");
        }
    }
}

/// 按连续失败次数计算线性退避延迟：`attempts` 为自增后的计数（从 1 开始）
fn backoff_delay_ms(reconnect_interval_ms: u64, attempts: u32) -> u64 {
    reconnect_interval_ms * u64::from(attempts)
}

/// 在没有显式 `stream` 字段的直连信封下，由 e/s/i 字段合成流名称
fn synthesize_stream_name(root: &Value) -> Option<String> {
    let data = root.get("data").unwrap_or(root);
    let symbol = data.get("s").and_then(Value::as_str)?;
    let interval = data.get("k").and_then(|k| k.get("i")).and_then(Value::as_str)?;
    Some(format!("{}@kline_{}", symbol.to_lowercase(), interval))
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn subscribe(
        &self,
        key: &CandleKey,
        stream_name: &str,
    ) -> Result<mpsc::Receiver<Vec<u8>>, StreamError> {
        let (tx, rx) = mpsc::channel(256);
        self.subscriptions.insert(stream_name.to_string(), tx);
        debug!(%key, %stream_name, "subscribed stream");
        self.ensure_reader_task();
        Ok(rx)
    }

    async fn unsubscribe(&self, key: &CandleKey, stream_name: &str) {
        self.subscriptions.remove(stream_name);
        debug!(%key, %stream_name, "unsubscribed stream");
        if self.subscriptions.is_empty() {
            self.resubscribe_notify.notify_one();
        }
    }

    async fn status(&self) -> Vec<ConnectionStatus> {
        vec![ConnectionStatus {
            market: self.market,
            open: self.open.load(Ordering::SeqCst),
            subscriptions: self
                .subscriptions
                .iter()
                .map(|e| e.key().clone())
                .collect(),
        }]
    }

    fn market(&self) -> Market {
        self.market
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn backoff_delay_grows_linearly_with_attempts() {
        // Three consecutive failures against a 5s interval should sleep
        // ~5s/10s/15s, not 10s/15s/20s (attempts is already post-increment).
        assert_eq!(backoff_delay_ms(5_000, 1), 5_000);
        assert_eq!(backoff_delay_ms(5_000, 2), 10_000);
        assert_eq!(backoff_delay_ms(5_000, 3), 15_000);
    }

    #[tokio::test]
    async fn exhausted_reconnect_attempts_emits_reconnect_failed() {
        // Port 1 on loopback refuses connections immediately, so `connect_async`
        // fails fast without touching the network.
        let transport = WsTransport::new(Market::Spot, "ws://127.0.0.1:1", 5, 2);
        let mut lifecycle_rx = transport.lifecycle();
        let key = CandleKey::new("BTCUSDT", Market::Spot);
        let stream_name = key.stream_name("15m");
        let _rx = transport
            .subscribe(&key, &stream_name)
            .await
            .expect("subscribe succeeds");

        let event = tokio::time::timeout(Duration::from_secs(5), lifecycle_rx.recv())
            .await
            .expect("reconnect-failed event within timeout")
            .expect("lifecycle channel stays open");

        match event {
            LifecycleEvent::ReconnectFailed {
                stream_name: failed,
            } => assert_eq!(failed, stream_name),
            other => panic!("unexpected lifecycle event: {other:?}"),
        }
    }
}
