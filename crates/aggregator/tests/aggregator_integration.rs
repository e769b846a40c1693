use async_trait::async_trait;
use klineflow_cache::InMemoryCandleCache;
use klineflow_core::backfill::entity::BackfillReport;
use klineflow_core::backfill::port::BackfillRunner;
use klineflow_core::common::{CandleKey, Market};
use klineflow_core::event::entity::{Event, EventPayload, Topic};
use klineflow_core::event::port::EventBus;
use klineflow_core::stream::entity::ConnectionStatus;
use klineflow_core::stream::error::StreamError;
use klineflow_core::stream::port::StreamTransport;
use klineflow_eventbus::InMemoryEventBus;
use klineflow_store::SqliteCandleStore;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

use klineflow_aggregator::Aggregator;

// 15-min aligned epoch shared with crates/stream's own test fixtures.
const T0: i64 = 1_699_999_200_000;
const BUCKET: i64 = 900_000;

fn frame(open_time: i64, open: &str, high: &str, low: &str, close: &str, volume: &str, closed: bool) -> Vec<u8> {
    format!(
        r#"{{"e":"kline","s":"BTCUSDT","k":{{
            "t":{t},"T":{close_time},
            "o":"{o}","h":"{h}","l":"{l}","c":"{c}",
            "v":"{v}","q":"1000","n":10,
            "V":"5","Q":"500","x":{x},"i":"15m"
        }}}}"#,
        t = open_time,
        close_time = open_time + 899_999,
        o = open,
        h = high,
        l = low,
        c = close,
        v = volume,
        x = closed,
    )
    .into_bytes()
}

/// 供集成测试注入原始帧字节的可控传输层，不建立任何真实连接。
struct MockTransport {
    market: Market,
    senders: Mutex<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl MockTransport {
    fn new(market: Market) -> Self {
        Self {
            market,
            senders: Mutex::new(HashMap::new()),
        }
    }

    async fn push(&self, stream_name: &str, bytes: Vec<u8>) {
        let senders = self.senders.lock().await;
        if let Some(tx) = senders.get(stream_name) {
            let _ = tx.send(bytes).await;
        }
    }
}

#[async_trait]
impl StreamTransport for MockTransport {
    async fn subscribe(
        &self,
        _key: &CandleKey,
        stream_name: &str,
    ) -> Result<mpsc::Receiver<Vec<u8>>, StreamError> {
        let (tx, rx) = mpsc::channel(64);
        self.senders.lock().await.insert(stream_name.to_string(), tx);
        Ok(rx)
    }

    async fn unsubscribe(&self, _key: &CandleKey, stream_name: &str) {
        self.senders.lock().await.remove(stream_name);
    }

    async fn status(&self) -> Vec<ConnectionStatus> {
        vec![ConnectionStatus {
            market: self.market,
            open: true,
            subscriptions: self.senders.lock().await.keys().cloned().collect(),
        }]
    }

    fn market(&self) -> Market {
        self.market
    }
}

/// 在集成测试中不会被真正调用的占位 BackfillRunner
struct NoopBackfillRunner;

#[async_trait]
impl BackfillRunner for NoopBackfillRunner {
    async fn run(&self, _key: &CandleKey, window_start: i64, window_end: i64) -> BackfillReport {
        BackfillReport {
            success: true,
            total_candles: 0,
            new_candles: 0,
            duplicate_candles: 0,
            window_start,
            window_end,
            duration_ms: 0,
            errors: Vec::new(),
        }
    }
}

struct Harness {
    aggregator: Arc<Aggregator>,
    transport: Arc<MockTransport>,
    event_bus: Arc<InMemoryEventBus>,
    key: CandleKey,
    _tempdir: tempfile::TempDir,
}

async fn build_harness() -> Harness {
    let key = CandleKey::new("BTCUSDT", Market::Spot);
    let cache: Arc<dyn klineflow_core::cache::port::CandleCache> =
        Arc::new(InMemoryCandleCache::new(50));
    let tempdir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(
        SqliteCandleStore::new(tempdir.path())
            .await
            .expect("store open"),
    );
    let event_bus = Arc::new(InMemoryEventBus::new("aggregator-test"));
    let transport = Arc::new(MockTransport::new(Market::Spot));
    let backfill: Arc<dyn BackfillRunner> = Arc::new(NoopBackfillRunner);

    let mut transports: HashMap<Market, Arc<dyn StreamTransport>> = HashMap::new();
    transports.insert(Market::Spot, transport.clone() as Arc<dyn StreamTransport>);

    let aggregator = Aggregator::new(
        "aggregator-test",
        cache,
        store.clone() as Arc<dyn klineflow_core::store::port::CandleStore>,
        event_bus.clone() as Arc<dyn EventBus>,
        backfill,
        transports,
        20,
    );

    aggregator.on_startup(vec![key.clone()]).await;

    Harness {
        aggregator,
        transport,
        event_bus,
        key,
        _tempdir: tempdir,
    }
}

async fn recv_matching(rx: &mut tokio::sync::broadcast::Receiver<Event>, topic: Topic) -> Event {
    loop {
        let event = rx.recv().await.expect("event channel open");
        if event.topic() == topic {
            return event;
        }
    }
}

#[tokio::test]
async fn closed_candle_emits_completed_then_saved_and_persists() {
    let h = build_harness().await;
    let mut completed_rx = h.event_bus.subscribe(Topic::CandleCompleted);
    let mut saved_rx = h.event_bus.subscribe(Topic::CandleSaved);

    let stream_name = h.key.stream_name("15m");
    h.transport
        .push(&stream_name, frame(T0, "100", "110", "95", "105", "10", true))
        .await;

    let completed = recv_matching(&mut completed_rx, Topic::CandleCompleted).await;
    match completed.payload {
        EventPayload::CandleCompleted { candle, .. } => {
            assert_eq!(candle.open_time, T0);
            assert!(candle.is_closed);
        }
        other => panic!("unexpected payload: {other:?}"),
    }

    // candle.saved may lag slightly behind candle.completed since the save
    // is spawned, not awaited before publish — wait for it with a deadline.
    let saved = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        recv_matching(&mut saved_rx, Topic::CandleSaved),
    )
    .await
    .expect("candle.saved within deadline");
    match saved.payload {
        EventPayload::CandleSaved { key, .. } => assert_eq!(key, h.key),
        other => panic!("unexpected payload: {other:?}"),
    }

    assert!(h.aggregator.cache_len(&h.key) > 0);
}

#[tokio::test]
async fn high_volume_candle_triggers_anomaly_event() {
    let h = build_harness().await;
    let mut high_volume_rx = h.event_bus.subscribe(Topic::CandleHighVolume);
    let stream_name = h.key.stream_name("15m");

    // Ten baseline candles at volume 10, then one closed candle with 3x+ volume.
    for i in 0..10 {
        h.transport
            .push(
                &stream_name,
                frame(T0 + i * BUCKET, "100", "105", "95", "100", "10", true),
            )
            .await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    h.transport
        .push(
            &stream_name,
            frame(T0 + 10 * BUCKET, "100", "110", "95", "102", "50", true),
        )
        .await;

    let event = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        recv_matching(&mut high_volume_rx, Topic::CandleHighVolume),
    )
    .await
    .expect("candle.high-volume within deadline");
    match event.payload {
        EventPayload::CandleHighVolume {
            current_volume,
            ratio,
            ..
        } => {
            assert_eq!(current_volume, dec!(50));
            assert!(ratio >= dec!(3));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn price_spike_over_three_percent_triggers_anomaly_event() {
    let h = build_harness().await;
    let mut spike_rx = h.event_bus.subscribe(Topic::CandlePriceSpike);
    let stream_name = h.key.stream_name("15m");

    // open=100, close=104 -> 4% move, above the 3% threshold.
    h.transport
        .push(&stream_name, frame(T0, "100", "110", "95", "104", "10", true))
        .await;

    let event = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        recv_matching(&mut spike_rx, Topic::CandlePriceSpike),
    )
    .await
    .expect("candle.price-spike within deadline");
    match event.payload {
        EventPayload::CandlePriceSpike { percent, .. } => {
            assert!(percent >= dec!(3));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn gap_between_consecutive_candles_triggers_anomaly_event() {
    let h = build_harness().await;
    let mut gap_rx = h.event_bus.subscribe(Topic::CandleGapDetected);
    let stream_name = h.key.stream_name("15m");

    h.transport
        .push(&stream_name, frame(T0, "100", "105", "95", "100", "10", true))
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // next open = 103 vs prev close = 100 -> 3% gap, above the 1% threshold.
    h.transport
        .push(
            &stream_name,
            frame(T0 + BUCKET, "103", "108", "100", "105", "10", true),
        )
        .await;

    let event = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        recv_matching(&mut gap_rx, Topic::CandleGapDetected),
    )
    .await
    .expect("candle.gap-detected within deadline");
    match event.payload {
        EventPayload::CandleGapDetected { percent, .. } => {
            assert!(percent >= dec!(1));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_saves_then_publishes_destroyed() {
    let h = build_harness().await;
    let mut destroyed_rx = h.event_bus.subscribe(Topic::AggregatorDestroyed);
    let stream_name = h.key.stream_name("15m");

    h.transport
        .push(&stream_name, frame(T0, "100", "110", "95", "105", "10", true))
        .await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    h.aggregator.shutdown().await;

    let event = tokio::time::timeout(
        std::time::Duration::from_secs(2),
        recv_matching(&mut destroyed_rx, Topic::AggregatorDestroyed),
    )
    .await
    .expect("aggregator.destroyed within deadline");
    assert!(matches!(event.payload, EventPayload::AggregatorDestroyed));
}
