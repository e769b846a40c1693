use async_trait::async_trait;
use klineflow_core::backfill::entity::{BackfillErrorRecord, BackfillReport};
use klineflow_core::backfill::error::BackfillError;
use klineflow_core::backfill::port::{BackfillRunner, KlineRestProvider};
use klineflow_core::candle::entity::{Candle, BUCKET_MS};
use klineflow_core::common::{CandleKey, Market};
use klineflow_core::event::entity::{Event, EventPayload};
use klineflow_core::event::port::EventBus;
use klineflow_core::store::port::CandleStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// # Summary
/// C6：按 §4.6 五步游标算法与分页迭代对历史数据执行回填。
///
/// # Invariants
/// - 单次请求条数不超过 `max_candles_per_request`。
/// - `cursor` 单调递增，任务在 `cursor >= window_end` 或致命错误时终止。
pub struct BackfillEngine {
    service: String,
    store: Arc<dyn CandleStore>,
    event_bus: Arc<dyn EventBus>,
    providers: HashMap<Market, Arc<dyn KlineRestProvider>>,
    max_candles_per_request: i64,
    request_delay_ms: u64,
    batch_size: usize,
    max_retries: u32,
}

impl BackfillEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: impl Into<String>,
        store: Arc<dyn CandleStore>,
        event_bus: Arc<dyn EventBus>,
        providers: HashMap<Market, Arc<dyn KlineRestProvider>>,
        max_candles_per_request: u32,
        request_delay_ms: u64,
        batch_size: usize,
        max_retries: u32,
    ) -> Self {
        Self {
            service: service.into(),
            store,
            event_bus,
            providers,
            max_candles_per_request: i64::from(max_candles_per_request),
            request_delay_ms,
            batch_size,
            max_retries,
        }
    }

    /// # Summary
    /// 对给定分区键与窗口，依照 §4.6 的五步规则确定回填起点。
    ///
    /// # Returns
    /// `None` 表示数据已完整，无需回填；否则返回起始游标。
    async fn select_cursor(
        &self,
        key: &CandleKey,
        window_start: i64,
        window_end: i64,
    ) -> Result<Option<i64>, BackfillError> {
        let earliest = self
            .store
            .earliest(key, 1)
            .await
            .map_err(|e| BackfillError::InvalidConfig(e.to_string()))?
            .into_iter()
            .next();
        let latest = self
            .store
            .latest(key, 1)
            .await
            .map_err(|e| BackfillError::InvalidConfig(e.to_string()))?
            .into_iter()
            .next();

        match (earliest, latest) {
            (None, None) => Ok(Some(window_start)),
            (Some(earliest), _) if earliest.open_time > window_start => Ok(Some(window_start)),
            (_, Some(latest)) if latest.open_time + BUCKET_MS < window_end => {
                Ok(Some(latest.open_time + BUCKET_MS))
            }
            _ => Ok(None),
        }
    }

    async fn commit_buffer(
        &self,
        key: &CandleKey,
        buffer: &mut Vec<Candle>,
        new_candles: &mut u64,
        duplicate_candles: &mut u64,
    ) {
        for candle in buffer.drain(..) {
            let existed = matches!(
                self.store.find_by_open_time(key, candle.open_time).await,
                Ok(Some(_))
            );
            match self.store.save(key, &candle).await {
                Ok(()) => {
                    if existed {
                        *duplicate_candles += 1;
                    } else {
                        *new_candles += 1;
                    }
                }
                Err(e) => warn!(%key, open_time = candle.open_time, error = %e, "backfill candle save failed"),
            }
        }
    }
}

#[async_trait]
impl BackfillRunner for BackfillEngine {
    async fn run(&self, key: &CandleKey, window_start: i64, window_end: i64) -> BackfillReport {
        let started = Instant::now();

        let Some(provider) = self.providers.get(&key.market) else {
            return BackfillReport {
                success: false,
                total_candles: 0,
                new_candles: 0,
                duplicate_candles: 0,
                window_start,
                window_end,
                duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                errors: vec![BackfillErrorRecord {
                    window_start,
                    window_end,
                    reason: format!("no REST provider configured for market {}", key.market),
                }],
            };
        };

        let mut cursor = match self.select_cursor(key, window_start, window_end).await {
            Ok(Some(cursor)) => cursor,
            Ok(None) => {
                info!(%key, "backfill window already complete, nothing to do");
                return BackfillReport {
                    success: true,
                    total_candles: 0,
                    new_candles: 0,
                    duplicate_candles: 0,
                    window_start,
                    window_end,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    errors: Vec::new(),
                };
            }
            Err(e) => {
                return BackfillReport {
                    success: false,
                    total_candles: 0,
                    new_candles: 0,
                    duplicate_candles: 0,
                    window_start,
                    window_end,
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    errors: vec![BackfillErrorRecord {
                        window_start,
                        window_end,
                        reason: e.to_string(),
                    }],
                };
            }
        };

        let mut new_candles = 0u64;
        let mut duplicate_candles = 0u64;
        let mut errors = Vec::new();
        let mut success = true;
        let mut buffer: Vec<Candle> = Vec::new();

        'outer: while cursor < window_end {
            let batch_end = (cursor + self.max_candles_per_request * BUCKET_MS).min(window_end);
            let mut attempt = 0u32;

            loop {
                match provider
                    .klines(key, cursor, batch_end, u32::try_from(self.max_candles_per_request).unwrap_or(u32::MAX))
                    .await
                {
                    Ok(candles) => {
                        let next_cursor = candles
                            .last()
                            .map(|c| c.open_time + BUCKET_MS)
                            .unwrap_or(batch_end);
                        buffer.extend(candles);

                        if buffer.len() >= self.batch_size {
                            self.commit_buffer(key, &mut buffer, &mut new_candles, &mut duplicate_candles)
                                .await;
                        }

                        cursor = next_cursor;
                        tokio::time::sleep(std::time::Duration::from_millis(self.request_delay_ms))
                            .await;
                        continue 'outer;
                    }
                    Err(BackfillError::Fatal(reason)) => {
                        errors.push(BackfillErrorRecord {
                            window_start: cursor,
                            window_end: batch_end,
                            reason,
                        });
                        success = false;
                        break 'outer;
                    }
                    Err(e) => {
                        attempt += 1;
                        if attempt > self.max_retries {
                            warn!(%key, window_start = cursor, window_end = batch_end, "backfill batch exhausted retries, skipping window");
                            errors.push(BackfillErrorRecord {
                                window_start: cursor,
                                window_end: batch_end,
                                reason: e.to_string(),
                            });
                            self.event_bus.publish(Event::new(
                                &self.service,
                                EventPayload::BackfillGap {
                                    key: key.clone(),
                                    window_start: cursor,
                                    window_end: batch_end,
                                },
                            ));
                            cursor = batch_end;
                            tokio::time::sleep(std::time::Duration::from_millis(
                                self.request_delay_ms,
                            ))
                            .await;
                            continue 'outer;
                        }
                        tokio::time::sleep(std::time::Duration::from_secs(u64::from(attempt))).await;
                    }
                }
            }
        }

        self.commit_buffer(key, &mut buffer, &mut new_candles, &mut duplicate_candles)
            .await;

        BackfillReport {
            success,
            total_candles: new_candles + duplicate_candles,
            new_candles,
            duplicate_candles,
            window_start,
            window_end,
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use klineflow_core::event::entity::Topic;
    use klineflow_eventbus::InMemoryEventBus;
    use klineflow_store::SqliteCandleStore;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn candle(open_time: i64) -> Candle {
        Candle {
            open_time,
            close_time: open_time + 899_999,
            open: dec!(100),
            high: dec!(110),
            low: dec!(95),
            close: dec!(105),
            volume: dec!(10),
            quote_volume: dec!(1000),
            taker_buy_base_volume: dec!(5),
            taker_buy_quote_volume: dec!(500),
            trades: 10,
            is_closed: true,
        }
    }

    struct ScriptedProvider {
        fail_times: AtomicU32,
        calls: Mutex<Vec<(i64, i64)>>,
    }

    impl ScriptedProvider {
        fn new(fail_times: u32) -> Self {
            Self {
                fail_times: AtomicU32::new(fail_times),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl KlineRestProvider for ScriptedProvider {
        async fn klines(
            &self,
            _key: &CandleKey,
            start: i64,
            end: i64,
            _limit: u32,
        ) -> Result<Vec<Candle>, BackfillError> {
            self.calls.lock().unwrap().push((start, end));
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(BackfillError::Transient("simulated 429".to_string()));
            }
            let mut out = Vec::new();
            let mut t = start;
            while t < end {
                out.push(candle(t));
                t += BUCKET_MS;
            }
            Ok(out)
        }
    }

    async fn harness(
        fail_times: u32,
        max_retries: u32,
    ) -> (BackfillEngine, Arc<SqliteCandleStore>, Arc<InMemoryEventBus>, tempfile::TempDir) {
        let tempdir = tempfile::tempdir().unwrap();
        let store = Arc::new(SqliteCandleStore::new(tempdir.path()).await.unwrap());
        let event_bus = Arc::new(InMemoryEventBus::new("backfill-test"));
        let mut providers: HashMap<Market, Arc<dyn KlineRestProvider>> = HashMap::new();
        providers.insert(Market::Spot, Arc::new(ScriptedProvider::new(fail_times)));

        let engine = BackfillEngine::new(
            "backfill-test",
            store.clone() as Arc<dyn CandleStore>,
            event_bus.clone() as Arc<dyn EventBus>,
            providers,
            1500,
            0,
            500,
            max_retries,
        );
        (engine, store, event_bus, tempdir)
    }

    #[tokio::test]
    async fn select_cursor_starts_at_window_start_on_empty_store() {
        let (engine, _store, _bus, _dir) = harness(0, 3).await;
        let key = CandleKey::new("BTCUSDT", Market::Spot);
        let cursor = engine.select_cursor(&key, 1_000 * BUCKET_MS, 1_010 * BUCKET_MS).await.unwrap();
        assert_eq!(cursor, Some(1_000 * BUCKET_MS));
    }

    #[tokio::test]
    async fn select_cursor_resumes_from_latest_plus_one_bucket() {
        let (engine, store, _bus, _dir) = harness(0, 3).await;
        let key = CandleKey::new("BTCUSDT", Market::Spot);
        store.save(&key, &candle(1_000 * BUCKET_MS)).await.unwrap();

        let cursor = engine.select_cursor(&key, 1_000 * BUCKET_MS, 1_010 * BUCKET_MS).await.unwrap();
        assert_eq!(cursor, Some(1_001 * BUCKET_MS));
    }

    #[tokio::test]
    async fn select_cursor_returns_none_when_window_already_covered() {
        let (engine, store, _bus, _dir) = harness(0, 3).await;
        let key = CandleKey::new("BTCUSDT", Market::Spot);
        store.save(&key, &candle(1_000 * BUCKET_MS)).await.unwrap();
        store.save(&key, &candle(1_001 * BUCKET_MS)).await.unwrap();

        let cursor = engine.select_cursor(&key, 1_000 * BUCKET_MS, 1_001 * BUCKET_MS).await.unwrap();
        assert_eq!(cursor, None);
    }

    #[tokio::test]
    async fn run_fetches_and_persists_full_window() {
        let (engine, store, _bus, _dir) = harness(0, 3).await;
        let key = CandleKey::new("BTCUSDT", Market::Spot);
        let start = 2_000 * BUCKET_MS;
        let end = 2_005 * BUCKET_MS;

        let report = engine.run(&key, start, end).await;
        assert!(report.success);
        assert_eq!(report.new_candles, 5);
        assert_eq!(report.duplicate_candles, 0);
        assert!(report.errors.is_empty());
        assert_eq!(store.count(&key).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn rerunning_backfill_reports_all_duplicates() {
        let (engine, _store, _bus, _dir) = harness(0, 3).await;
        let key = CandleKey::new("BTCUSDT", Market::Spot);
        let start = 3_000 * BUCKET_MS;
        let end = 3_003 * BUCKET_MS;

        let first = engine.run(&key, start, end).await;
        assert_eq!(first.new_candles, 3);

        let second = engine.run(&key, start, end).await;
        assert_eq!(second.new_candles, 0);
        assert_eq!(second.duplicate_candles, 3);
    }

    #[tokio::test]
    async fn retry_exhaustion_skips_window_and_publishes_gap() {
        let (engine, _store, bus, _dir) = harness(5, 2).await;
        let key = CandleKey::new("BTCUSDT", Market::Spot);
        let mut gap_rx = bus.subscribe(Topic::BackfillGap);

        let start = 4_000 * BUCKET_MS;
        let end = 4_002 * BUCKET_MS;
        let report = engine.run(&key, start, end).await;

        assert!(report.success);
        assert_eq!(report.errors.len(), 1);

        let event = tokio::time::timeout(std::time::Duration::from_secs(1), gap_rx.recv())
            .await
            .expect("gap event within deadline")
            .expect("channel open");
        assert!(matches!(event.payload, EventPayload::BackfillGap { .. }));
    }
}
