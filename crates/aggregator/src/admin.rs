use crate::aggregator::Aggregator;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use klineflow_core::admin::port::{AdminApi, KeyStatistics, Statistics};
use klineflow_core::backfill::entity::{BackfillErrorRecord, BackfillReport};
use klineflow_core::candle::entity::Candle;
use klineflow_core::common::{CandleKey, Market};
use klineflow_core::store::error::StoreError;

/// 当本地既无配置又无既往记录时，`backfill_all` 回填的默认回望窗口（90 天）。
const DEFAULT_BACKFILL_LOOKBACK_MS: i64 = 90 * 24 * 3_600 * 1_000;

fn unknown_symbol_report(symbol: &str) -> BackfillReport {
    BackfillReport {
        success: false,
        total_candles: 0,
        new_candles: 0,
        duplicate_candles: 0,
        window_start: 0,
        window_end: 0,
        duration_ms: 0,
        errors: vec![BackfillErrorRecord {
            window_start: 0,
            window_end: 0,
            reason: format!("unknown symbol: {symbol}"),
        }],
    }
}

#[async_trait]
impl AdminApi for Aggregator {
    async fn latest(&self, symbol: &str) -> Result<Option<Candle>, StoreError> {
        let Some(key) = self.resolve(symbol) else {
            return Ok(None);
        };
        if let Some(tail) = self.cache().tail(&key) {
            return Ok(Some(tail));
        }
        Ok(self.store().latest(&key, 1).await?.into_iter().next())
    }

    async fn history(
        &self,
        symbol: &str,
        limit: usize,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, StoreError> {
        let Some(key) = self.resolve(symbol) else {
            return Ok(Vec::new());
        };
        match (start_time, end_time) {
            (Some(start), Some(end)) => {
                self.store()
                    .range(&key, start.timestamp_millis(), end.timestamp_millis())
                    .await
            }
            _ => self.store().latest(&key, limit).await,
        }
    }

    async fn statistics(&self) -> Result<Statistics, StoreError> {
        let mut per_key = Vec::new();
        let mut global_first: Option<i64> = None;
        let mut global_last: Option<i64> = None;

        for entry in self.symbol_index.iter() {
            let key = entry.value().clone();
            let total = self.store().count(&key).await?;
            let first_time = self
                .store()
                .earliest(&key, 1)
                .await?
                .into_iter()
                .next()
                .map(|c| c.open_time);
            let last_time = self
                .store()
                .latest(&key, 1)
                .await?
                .into_iter()
                .next()
                .map(|c| c.open_time);

            if let Some(ft) = first_time {
                global_first = Some(global_first.map_or(ft, |g| g.min(ft)));
            }
            if let Some(lt) = last_time {
                global_last = Some(global_last.map_or(lt, |g| g.max(lt)));
            }

            per_key.push(KeyStatistics {
                symbol: entry.key().clone(),
                total_candles: total,
                first_time,
                last_time,
            });
        }

        Ok(Statistics {
            total_candles_per_key: per_key,
            first_time: global_first,
            last_time: global_last,
        })
    }

    async fn subscribe(&self, symbol: &str) -> Result<(), StoreError> {
        let Some(this) = self.upgrade_self() else {
            return Err(StoreError::InitError(
                "aggregator reference unavailable".to_string(),
            ));
        };
        let key = self
            .resolve(symbol)
            .unwrap_or_else(|| CandleKey::new(symbol.to_uppercase(), Market::Spot));
        this.start_key(key).await;
        Ok(())
    }

    async fn unsubscribe(&self, symbol: &str) -> Result<(), StoreError> {
        let Some(key) = self.resolve(symbol) else {
            return Err(StoreError::NotFound);
        };
        self.stop_key(&key).await;
        Ok(())
    }

    async fn backfill_all(&self, symbol: &str) -> BackfillReport {
        let Some(key) = self.resolve(symbol) else {
            return unknown_symbol_report(symbol);
        };
        let now = Utc::now().timestamp_millis();
        let window_start = match self.store().earliest(&key, 1).await {
            Ok(candles) => candles
                .into_iter()
                .next()
                .map(|c| c.open_time)
                .unwrap_or(now - DEFAULT_BACKFILL_LOOKBACK_MS),
            Err(_) => now - DEFAULT_BACKFILL_LOOKBACK_MS,
        };
        self.backfill().run(&key, window_start, now).await
    }

    async fn backfill_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BackfillReport {
        let Some(key) = self.resolve(symbol) else {
            return unknown_symbol_report(symbol);
        };
        self.backfill()
            .run(&key, start.timestamp_millis(), end.timestamp_millis())
            .await
    }

    async fn data_stats(&self, symbol: &str) -> Result<KeyStatistics, StoreError> {
        let Some(key) = self.resolve(symbol) else {
            return Err(StoreError::NotFound);
        };
        let total = self.store().count(&key).await?;
        let first_time = self
            .store()
            .earliest(&key, 1)
            .await?
            .into_iter()
            .next()
            .map(|c| c.open_time);
        let last_time = self
            .store()
            .latest(&key, 1)
            .await?
            .into_iter()
            .next()
            .map(|c| c.open_time);

        Ok(KeyStatistics {
            symbol: symbol.to_string(),
            total_candles: total,
            first_time,
            last_time,
        })
    }
}
