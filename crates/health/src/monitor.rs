use chrono::Utc;
use klineflow_aggregator::Aggregator;
use klineflow_core::common::Market;
use klineflow_core::event::entity::{Event, EventPayload};
use klineflow_core::event::port::EventBus;
use klineflow_core::health::entity::{ConnectivityStatus, HealthSnapshot, KeyHealth};
use klineflow_core::store::port::CandleStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 判定为 connected 所要求的最大静默时长（毫秒）
const CONNECTED_MAX_SILENCE_MS: i64 = 5 * 60 * 1_000;
/// 判定为 stale 所要求的最小静默时长（毫秒）
const STALE_MIN_SILENCE_MS: i64 = 10 * 60 * 1_000;

/// # Summary
/// C8：周期性地对所有已订阅分区键计算连通性分类，聚合内存与存储健康状况，
/// 发布 `aggregator.health`；对 stale 键触发重新订阅。
///
/// # Invariants
/// - 每轮快照覆盖 `Aggregator::subscribed_keys()` 返回的全部分区键。
pub struct HealthMonitor {
    service: String,
    aggregator: Arc<Aggregator>,
    store: Arc<dyn CandleStore>,
    event_bus: Arc<dyn EventBus>,
    interval_ms: u64,
}

impl HealthMonitor {
    pub fn new(
        service: impl Into<String>,
        aggregator: Arc<Aggregator>,
        store: Arc<dyn CandleStore>,
        event_bus: Arc<dyn EventBus>,
        interval_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            service: service.into(),
            aggregator,
            store,
            event_bus,
            interval_ms,
        })
    }

    /// # Summary
    /// 启动周期性健康检查后台任务。
    ///
    /// # Logic
    /// 每隔 `interval_ms` 执行一轮 `run_once`；任务句柄交由调用方持有以便优雅关闭时中止。
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(this.interval_ms));
            loop {
                ticker.tick().await;
                this.run_once().await;
            }
        })
    }

    /// # Summary
    /// 执行单轮健康检查：分类每个分区键、聚合内存估计与存储健康、发布快照、触发 stale 重订阅。
    pub async fn run_once(&self) {
        let now = Utc::now().timestamp_millis();
        let transport_open: HashMap<Market, bool> = self
            .aggregator
            .transport_statuses()
            .await
            .into_iter()
            .map(|status| (status.market, status.open))
            .collect();

        let mut keys_health = Vec::new();
        let mut stale_keys = Vec::new();
        let mut total_cache_len: u64 = 0;

        for key in self.aggregator.subscribed_keys() {
            let last_frame_at = self.aggregator.last_frame_at(&key).unwrap_or(0);
            let cache_len = self.aggregator.cache_len(&key);
            total_cache_len += cache_len as u64;

            let market_open = transport_open.get(&key.market).copied().unwrap_or(false);
            let silence = now - last_frame_at;
            let status = if market_open && silence < CONNECTED_MAX_SILENCE_MS {
                ConnectivityStatus::Connected
            } else if silence > STALE_MIN_SILENCE_MS {
                ConnectivityStatus::Stale
            } else {
                ConnectivityStatus::Disconnected
            };

            if status == ConnectivityStatus::Stale {
                stale_keys.push(key.clone());
            }

            keys_health.push(KeyHealth {
                key,
                status,
                last_frame_at,
                cache_len,
            });
        }

        let store_healthy = self.store.health_check().await;
        let memory_bytes_estimate = total_cache_len * std::mem::size_of::<klineflow_core::candle::entity::Candle>() as u64;

        let snapshot = HealthSnapshot {
            generated_at: Utc::now(),
            keys: keys_health,
            memory_bytes_estimate,
            store_healthy,
        };

        self.event_bus.publish(Event::new(
            &self.service,
            EventPayload::AggregatorHealth(snapshot),
        ));

        for key in stale_keys {
            info!(%key, "health monitor detected stale key, forcing resubscribe");
            self.aggregator.resubscribe(&key).await;
        }

        debug!("health check round complete");
    }
}
