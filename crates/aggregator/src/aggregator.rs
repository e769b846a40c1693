use crate::anomaly;
use crate::state::KeyRuntime;
use chrono::Utc;
use klineflow_core::backfill::port::BackfillRunner;
use klineflow_core::cache::port::CandleCache;
use klineflow_core::candle::entity::Candle;
use klineflow_core::common::{CandleKey, Market};
use klineflow_core::event::entity::{Event, EventPayload};
use klineflow_core::event::port::EventBus;
use klineflow_core::store::port::CandleStore;
use klineflow_core::stream::entity::ConnectionStatus;
use klineflow_core::stream::port::StreamTransport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const INTERVAL: &str = "15m";
const GRACEFUL_SHUTDOWN_WAIT_MS: u64 = 5_000;

/// # Summary
/// C5：在实时路径上编排 CandleCache/CandleStore/StreamTransport/EventBus，
/// 并对收盘 K 线执行异常分析。
///
/// # Invariants
/// - 同一分区键的帧严格按到达顺序串行处理（单个任务独占该键）。
/// - `candle.completed` 总是先于对应的 `candle.saved`/`candle.save-failed` 发布。
pub struct Aggregator {
    service: String,
    cache: Arc<dyn CandleCache>,
    store: Arc<dyn CandleStore>,
    event_bus: Arc<dyn EventBus>,
    backfill: Arc<dyn BackfillRunner>,
    transports: HashMap<Market, Arc<dyn StreamTransport>>,
    hydrate_depth: usize,
    pub(crate) symbol_index: dashmap::DashMap<String, CandleKey>,
    runtimes: dashmap::DashMap<CandleKey, Arc<KeyRuntime>>,
    tasks: dashmap::DashMap<CandleKey, JoinHandle<()>>,
    in_flight_saves: Arc<AtomicI64>,
    self_weak: OnceLock<Weak<Aggregator>>,
}

impl Aggregator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: impl Into<String>,
        cache: Arc<dyn CandleCache>,
        store: Arc<dyn CandleStore>,
        event_bus: Arc<dyn EventBus>,
        backfill: Arc<dyn BackfillRunner>,
        transports: HashMap<Market, Arc<dyn StreamTransport>>,
        hydrate_depth: usize,
    ) -> Arc<Self> {
        let this = Arc::new(Self {
            service: service.into(),
            cache,
            store,
            event_bus,
            backfill,
            transports,
            hydrate_depth,
            symbol_index: dashmap::DashMap::new(),
            runtimes: dashmap::DashMap::new(),
            tasks: dashmap::DashMap::new(),
            in_flight_saves: Arc::new(AtomicI64::new(0)),
            self_weak: OnceLock::new(),
        });
        let _ = this.self_weak.set(Arc::downgrade(&this));
        this
    }

    /// # Summary
    /// 启动时对给定分区键集合执行 HYDRATING -> LIVE 的初始化。
    ///
    /// # Logic
    /// 1. 从 CandleStore 加载最近 `hydrate_depth` 条记录填充缓存。
    /// 2. 通过对应 Market 的 StreamTransport 订阅实时流。
    /// 3. 为该键启动独占的帧处理任务（HYDRATING -> LIVE）。
    pub async fn on_startup(self: &Arc<Self>, keys: Vec<CandleKey>) {
        for key in keys {
            self.start_key(key).await;
        }
    }

    pub(crate) async fn start_key(self: &Arc<Self>, key: CandleKey) {
        self.symbol_index
            .insert(key.symbol.to_uppercase(), key.clone());
        self.runtimes
            .insert(key.clone(), Arc::new(KeyRuntime::new()));

        match self.store.latest(&key, self.hydrate_depth).await {
            Ok(mut newest_first) => {
                newest_first.reverse();
                self.cache.load(&key, newest_first);
            }
            Err(e) => {
                warn!(%key, error = %e, "failed to hydrate cache from store, starting empty");
            }
        }

        let Some(transport) = self.transports.get(&key.market).cloned() else {
            warn!(%key, "no transport configured for this market, skipping subscription");
            return;
        };

        let stream_name = key.stream_name(INTERVAL);
        let rx = match transport.subscribe(&key, &stream_name).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(%key, error = %e, "failed to subscribe stream");
                return;
            }
        };

        info!(%key, "aggregator key transitioned to LIVE");
        self.spawn_key_task(key, rx);
    }

    fn spawn_key_task(self: &Arc<Self>, key: CandleKey, rx: mpsc::Receiver<Vec<u8>>) {
        let this = Arc::clone(self);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            this.run_key_task(task_key, rx).await;
        });
        self.tasks.insert(key, handle);
    }

    async fn run_key_task(self: Arc<Self>, key: CandleKey, mut rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(frame) = rx.recv().await {
            self.on_frame(&key, &frame).await;
        }
        debug!(%key, "frame channel closed, per-key task exiting");
    }

    async fn on_frame(&self, key: &CandleKey, frame: &[u8]) {
        let candle = match klineflow_stream::decode(frame) {
            Ok(c) => c,
            Err(e) => {
                warn!(%key, error = %e, "dropping malformed frame");
                self.touch(key);
                return;
            }
        };
        self.touch(key);

        if let Err(e) = self.cache.upsert(key, candle.clone()) {
            warn!(%key, error = %e, "cache upsert rejected frame");
            return;
        }

        if candle.is_closed {
            self.handle_closed_candle(key, candle).await;
        }
    }

    async fn handle_closed_candle(&self, key: &CandleKey, candle: Candle) {
        self.queue_save(key, &candle);

        self.event_bus.publish(Event::new(
            &self.service,
            EventPayload::CandleCompleted {
                key: key.clone(),
                candle: candle.clone(),
                timeframe: INTERVAL,
            },
        ));

        self.run_anomaly_analysis(key, &candle);
    }

    /// Fire-and-forget persistence: the candle is durably *queued* before
    /// `candle.completed` is published, but the write itself runs concurrently.
    fn queue_save(&self, key: &CandleKey, candle: &Candle) {
        let store = self.store.clone();
        let bus = self.event_bus.clone();
        let service = self.service.clone();
        let save_key = key.clone();
        let save_candle = candle.clone();
        let in_flight = self.in_flight_saves.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            match store.save(&save_key, &save_candle).await {
                Ok(()) => bus.publish(Event::new(
                    &service,
                    EventPayload::CandleSaved {
                        key: save_key,
                        candle: save_candle,
                    },
                )),
                Err(e) => bus.publish(Event::new(
                    &service,
                    EventPayload::CandleSaveFailed {
                        key: save_key,
                        open_time: save_candle.open_time,
                        error: e.to_string(),
                    },
                )),
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
        });
    }

    fn run_anomaly_analysis(&self, key: &CandleKey, candle: &Candle) {
        let window = self.cache.slice(key, 11);
        let prior: Vec<Candle> = if window.is_empty() {
            Vec::new()
        } else {
            window[..window.len() - 1].to_vec()
        };

        if let Some((current_volume, average_volume, ratio)) =
            anomaly::detect_high_volume(candle, &prior)
        {
            self.event_bus.publish(Event::new(
                &self.service,
                EventPayload::CandleHighVolume {
                    key: key.clone(),
                    candle: candle.clone(),
                    current_volume,
                    average_volume,
                    ratio,
                },
            ));
        }

        if let Some((percent, direction)) = anomaly::detect_price_spike(candle) {
            self.event_bus.publish(Event::new(
                &self.service,
                EventPayload::CandlePriceSpike {
                    key: key.clone(),
                    candle: candle.clone(),
                    percent,
                    direction,
                },
            ));
        }

        if let Some(prev) = prior.last()
            && let Some((percent, direction)) = anomaly::detect_gap(candle.open, prev.close)
        {
            self.event_bus.publish(Event::new(
                &self.service,
                EventPayload::CandleGapDetected {
                    key: key.clone(),
                    candle: candle.clone(),
                    percent,
                    direction,
                    prev_close: prev.close,
                    current_open: candle.open,
                },
            ));
        }
    }

    fn touch(&self, key: &CandleKey) {
        if let Some(rt) = self.runtimes.get(key) {
            rt.last_frame_at
                .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        }
    }

    /// 供 HealthMonitor 读取：该键最近一次收到帧的时间（毫秒时间戳），未订阅返回 `None`。
    pub fn last_frame_at(&self, key: &CandleKey) -> Option<i64> {
        self.runtimes.get(key).map(|rt| rt.last_frame_at.load(Ordering::SeqCst))
    }

    /// 供 HealthMonitor 读取：当前所有已注册的分区键。
    pub fn subscribed_keys(&self) -> Vec<CandleKey> {
        self.runtimes.iter().map(|e| e.key().clone()).collect()
    }

    /// 供 HealthMonitor 读取：该键当前缓存长度。
    pub fn cache_len(&self, key: &CandleKey) -> usize {
        self.cache.len(key)
    }

    /// 供 HealthMonitor 聚合：所有已配置 Market 传输层的连接状态。
    pub async fn transport_statuses(&self) -> Vec<ConnectionStatus> {
        let mut all = Vec::new();
        for transport in self.transports.values() {
            all.extend(transport.status().await);
        }
        all
    }

    /// 供 HealthMonitor 在检测到 stale 时调用：强制重新订阅该键。
    pub async fn resubscribe(&self, key: &CandleKey) {
        let Some(transport) = self.transports.get(&key.market).cloned() else {
            return;
        };
        let Some(this) = self.self_weak.get().and_then(Weak::upgrade) else {
            return;
        };

        let stream_name = key.stream_name(INTERVAL);
        match transport.resubscribe(key, &stream_name).await {
            Ok(rx) => {
                if let Some((_, old)) = this.tasks.remove(key) {
                    old.abort();
                }
                this.spawn_key_task(key.clone(), rx);
                info!(%key, "resubscribed after stale detection");
            }
            Err(e) => warn!(%key, error = %e, "resubscribe failed"),
        }
    }

    pub(crate) async fn stop_key(&self, key: &CandleKey) {
        if let Some((_, handle)) = self.tasks.remove(key) {
            handle.abort();
        }
        if let Some(transport) = self.transports.get(&key.market) {
            transport.unsubscribe(key, &key.stream_name(INTERVAL)).await;
        }
        self.runtimes.remove(key);
    }

    pub(crate) fn resolve(&self, symbol: &str) -> Option<CandleKey> {
        self.symbol_index
            .get(&symbol.to_uppercase())
            .map(|e| e.value().clone())
    }

    pub(crate) fn store(&self) -> &Arc<dyn CandleStore> {
        &self.store
    }

    pub(crate) fn cache(&self) -> &Arc<dyn CandleCache> {
        &self.cache
    }

    pub(crate) fn backfill(&self) -> &Arc<dyn BackfillRunner> {
        &self.backfill
    }

    pub(crate) fn upgrade_self(&self) -> Option<Arc<Aggregator>> {
        self.self_weak.get().and_then(Weak::upgrade)
    }

    /// # Summary
    /// 优雅关闭：停止接受新订阅、有界等待在途写入完成、关闭连接、发布 `aggregator.destroyed`。
    pub async fn shutdown(&self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();

        let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_millis(GRACEFUL_SHUTDOWN_WAIT_MS);
        while self.in_flight_saves.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        self.event_bus
            .publish(Event::new(&self.service, EventPayload::AggregatorDestroyed));
    }
}
