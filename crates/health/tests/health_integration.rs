use async_trait::async_trait;
use klineflow_aggregator::Aggregator;
use klineflow_cache::InMemoryCandleCache;
use klineflow_core::backfill::entity::BackfillReport;
use klineflow_core::backfill::port::BackfillRunner;
use klineflow_core::common::{CandleKey, Market};
use klineflow_core::event::entity::{EventPayload, Topic};
use klineflow_core::event::port::EventBus;
use klineflow_core::health::entity::ConnectivityStatus;
use klineflow_core::stream::entity::ConnectionStatus;
use klineflow_core::stream::error::StreamError;
use klineflow_core::stream::port::StreamTransport;
use klineflow_eventbus::InMemoryEventBus;
use klineflow_health::HealthMonitor;
use klineflow_store::SqliteCandleStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;

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

fn frame(open_time: i64, closed: bool) -> Vec<u8> {
    format!(
        r#"{{"e":"kline","s":"BTCUSDT","k":{{
            "t":{t},"T":{close_time},
            "o":"100","h":"110","l":"95","c":"105",
            "v":"10","q":"1000","n":10,
            "V":"5","Q":"500","x":{x},"i":"15m"
        }}}}"#,
        t = open_time,
        close_time = open_time + 899_999,
        x = closed,
    )
    .into_bytes()
}

async fn build() -> (Arc<Aggregator>, Arc<MockTransport>, Arc<InMemoryEventBus>, Arc<SqliteCandleStore>, CandleKey, tempfile::TempDir) {
    let key = CandleKey::new("BTCUSDT", Market::Spot);
    let cache: Arc<dyn klineflow_core::cache::port::CandleCache> = Arc::new(InMemoryCandleCache::new(50));
    let tempdir = tempfile::tempdir().unwrap();
    let store = Arc::new(SqliteCandleStore::new(tempdir.path()).await.unwrap());
    let event_bus = Arc::new(InMemoryEventBus::new("health-test"));
    let transport = Arc::new(MockTransport::new(Market::Spot));
    let backfill: Arc<dyn BackfillRunner> = Arc::new(NoopBackfillRunner);

    let mut transports: HashMap<Market, Arc<dyn StreamTransport>> = HashMap::new();
    transports.insert(Market::Spot, transport.clone() as Arc<dyn StreamTransport>);

    let aggregator = Aggregator::new(
        "health-test",
        cache,
        store.clone() as Arc<dyn klineflow_core::store::port::CandleStore>,
        event_bus.clone() as Arc<dyn EventBus>,
        backfill,
        transports,
        20,
    );
    aggregator.on_startup(vec![key.clone()]).await;

    (aggregator, transport, event_bus, store, key, tempdir)
}

#[tokio::test]
async fn never_received_frame_is_classified_stale() {
    let (aggregator, _transport, event_bus, store, _key, _dir) = build().await;
    let monitor = HealthMonitor::new(
        "health-test",
        aggregator,
        store as Arc<dyn klineflow_core::store::port::CandleStore>,
        event_bus.clone() as Arc<dyn EventBus>,
        60_000,
    );
    let mut health_rx = event_bus.subscribe(Topic::AggregatorHealth);

    monitor.run_once().await;

    let event = health_rx.recv().await.expect("health event published");
    match event.payload {
        EventPayload::AggregatorHealth(snapshot) => {
            assert_eq!(snapshot.keys.len(), 1);
            assert_eq!(snapshot.keys[0].status, ConnectivityStatus::Stale);
            assert!(snapshot.store_healthy);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[tokio::test]
async fn key_with_recent_frame_is_classified_connected() {
    let (aggregator, transport, event_bus, store, key, _dir) = build().await;
    let stream_name = key.stream_name("15m");
    transport.push(&stream_name, frame(1_699_999_200_000, false)).await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;

    let monitor = HealthMonitor::new(
        "health-test",
        aggregator,
        store as Arc<dyn klineflow_core::store::port::CandleStore>,
        event_bus.clone() as Arc<dyn EventBus>,
        60_000,
    );
    let mut health_rx = event_bus.subscribe(Topic::AggregatorHealth);

    monitor.run_once().await;

    let event = health_rx.recv().await.expect("health event published");
    match event.payload {
        EventPayload::AggregatorHealth(snapshot) => {
            assert_eq!(snapshot.keys[0].status, ConnectivityStatus::Connected);
            assert!(snapshot.memory_bytes_estimate > 0);
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}
