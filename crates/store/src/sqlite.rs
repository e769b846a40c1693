use async_trait::async_trait;
use klineflow_core::candle::entity::Candle;
use klineflow_core::common::CandleKey;
use klineflow_core::store::error::StoreError;
use klineflow_core::store::port::CandleStore;
use rust_decimal::Decimal;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::path::Path;

/// # Summary
/// `CandleStore` 的 SQLite 实现，所有分区键共用同一个数据库文件。
///
/// # Invariants
/// - `candles_15m` 表以 `(symbol, market, open_time)` 为唯一索引，`save` 通过
///   `INSERT ... ON CONFLICT` 实现幂等 upsert。
/// - 与教师仓库的“一库一股”策略不同：这里所有交易对、所有市场分段共享一个
///   连接池与一张表，靠唯一索引而非文件边界做隔离。
pub struct SqliteCandleStore {
    pool: SqlitePool,
}

impl SqliteCandleStore {
    /// 创建新的存储实例，若数据目录不存在则创建，并执行建表迁移。
    ///
    /// # Arguments
    /// * `data_dir`: 数据库文件所在目录。
    pub async fn new(data_dir: &Path) -> Result<Self, StoreError> {
        if !data_dir.exists() {
            std::fs::create_dir_all(data_dir).map_err(|e| StoreError::InitError(e.to_string()))?;
        }
        let db_path = data_dir.join("candles.db");

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::InitError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candles_15m (
                symbol TEXT NOT NULL,
                market TEXT NOT NULL,
                open_time INTEGER NOT NULL,
                close_time INTEGER NOT NULL,
                open TEXT NOT NULL,
                high TEXT NOT NULL,
                low TEXT NOT NULL,
                close TEXT NOT NULL,
                volume TEXT NOT NULL,
                quote_volume TEXT NOT NULL,
                taker_buy_base_volume TEXT NOT NULL,
                taker_buy_quote_volume TEXT NOT NULL,
                trades INTEGER NOT NULL,
                is_closed INTEGER NOT NULL,
                PRIMARY KEY (symbol, market, open_time)
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candles_15m_range
            ON candles_15m (symbol, market, open_time DESC);
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

        Ok(Self { pool })
    }

    fn row_to_candle(row: &sqlx::sqlite::SqliteRow) -> Result<Candle, StoreError> {
        Ok(Candle {
            open_time: row.try_get("open_time").map_err(store_err)?,
            close_time: row.try_get("close_time").map_err(store_err)?,
            open: row.try_get::<Decimal, _>("open").map_err(store_err)?,
            high: row.try_get::<Decimal, _>("high").map_err(store_err)?,
            low: row.try_get::<Decimal, _>("low").map_err(store_err)?,
            close: row.try_get::<Decimal, _>("close").map_err(store_err)?,
            volume: row.try_get::<Decimal, _>("volume").map_err(store_err)?,
            quote_volume: row.try_get::<Decimal, _>("quote_volume").map_err(store_err)?,
            taker_buy_base_volume: row
                .try_get::<Decimal, _>("taker_buy_base_volume")
                .map_err(store_err)?,
            taker_buy_quote_volume: row
                .try_get::<Decimal, _>("taker_buy_quote_volume")
                .map_err(store_err)?,
            trades: row.try_get("trades").map_err(store_err)?,
            is_closed: row.try_get::<i64, _>("is_closed").map_err(store_err)? != 0,
        })
    }
}

fn store_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

#[async_trait]
impl CandleStore for SqliteCandleStore {
    async fn save(&self, key: &CandleKey, candle: &Candle) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO candles_15m (
                symbol, market, open_time, close_time, open, high, low, close,
                volume, quote_volume, taker_buy_base_volume, taker_buy_quote_volume,
                trades, is_closed
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol, market, open_time) DO UPDATE SET
                close_time = excluded.close_time,
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume,
                quote_volume = excluded.quote_volume,
                taker_buy_base_volume = excluded.taker_buy_base_volume,
                taker_buy_quote_volume = excluded.taker_buy_quote_volume,
                trades = excluded.trades,
                is_closed = excluded.is_closed
            "#,
        )
        .bind(&key.symbol)
        .bind(key.market.to_string())
        .bind(candle.open_time)
        .bind(candle.close_time)
        .bind(candle.open)
        .bind(candle.high)
        .bind(candle.low)
        .bind(candle.close)
        .bind(candle.volume)
        .bind(candle.quote_volume)
        .bind(candle.taker_buy_base_volume)
        .bind(candle.taker_buy_quote_volume)
        .bind(candle.trades)
        .bind(candle.is_closed as i64)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn find_by_open_time(
        &self,
        key: &CandleKey,
        open_time: i64,
    ) -> Result<Option<Candle>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM candles_15m WHERE symbol = ? AND market = ? AND open_time = ?",
        )
        .bind(&key.symbol)
        .bind(key.market.to_string())
        .bind(open_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::row_to_candle).transpose()
    }

    async fn latest(&self, key: &CandleKey, n: usize) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles_15m WHERE symbol = ? AND market = ?
            ORDER BY open_time DESC LIMIT ?
            "#,
        )
        .bind(&key.symbol)
        .bind(key.market.to_string())
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::row_to_candle).collect()
    }

    async fn earliest(&self, key: &CandleKey, n: usize) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles_15m WHERE symbol = ? AND market = ?
            ORDER BY open_time ASC LIMIT ?
            "#,
        )
        .bind(&key.symbol)
        .bind(key.market.to_string())
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::row_to_candle).collect()
    }

    async fn range(
        &self,
        key: &CandleKey,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candles_15m
            WHERE symbol = ? AND market = ? AND open_time >= ? AND open_time <= ?
            ORDER BY open_time ASC
            "#,
        )
        .bind(&key.symbol)
        .bind(key.market.to_string())
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::row_to_candle).collect()
    }

    async fn count(&self, key: &CandleKey) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n FROM candles_15m WHERE symbol = ? AND market = ?",
        )
        .bind(&key.symbol)
        .bind(key.market.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        row.try_get("n").map_err(store_err)
    }

    async fn health_check(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
