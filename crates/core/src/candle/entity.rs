use crate::candle::error::DecodeError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 15 分钟桶的固定跨度（毫秒）
pub const BUCKET_MS: i64 = 900_000;

/// # Summary
/// 归一化到 15 分钟桶的 OHLCV 记录。
///
/// # Invariants
/// - `low <= min(open, close) <= max(open, close) <= high`。
/// - `close_time - open_time == 899_999`。
/// - `open_time` 必须按 900_000 毫秒对齐。
/// - 所有成交量字段非负，OHLC 字段严格为正。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    // K 线开盘时间（UTC 毫秒，桶键）
    pub open_time: i64,
    // K 线收盘时间（UTC 毫秒）
    pub close_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
    // 该桶内的成交笔数
    pub trades: i32,
    // 上游是否已标记该桶收盘（x 字段，权威信号）
    pub is_closed: bool,
}

impl Candle {
    /// # Summary
    /// 校验该 K 线是否满足所有数据不变式。
    ///
    /// # Logic
    /// 1. 检查所有价格字段严格为正。
    /// 2. 检查 OHLC 大小关系。
    /// 3. 检查成交量字段非负。
    /// 4. 检查 open_time 对齐与 close_time 偏移。
    ///
    /// # Returns
    /// 通过返回 `Ok(())`，否则返回具体的 `DecodeError`。
    pub fn validate(&self) -> Result<(), DecodeError> {
        for (name, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
        ] {
            if value <= Decimal::ZERO {
                return Err(DecodeError::NonPositivePrice(name));
            }
        }

        let lower = self.open.min(self.close);
        let upper = self.open.max(self.close);
        if self.low > lower || upper > self.high || self.low > self.high {
            return Err(DecodeError::OhlcInconsistent);
        }

        for (name, value) in [
            ("volume", self.volume),
            ("quote_volume", self.quote_volume),
            ("taker_buy_base_volume", self.taker_buy_base_volume),
            ("taker_buy_quote_volume", self.taker_buy_quote_volume),
        ] {
            if value < Decimal::ZERO {
                return Err(DecodeError::NegativeVolume(name));
            }
        }

        if self.open_time % BUCKET_MS != 0 {
            return Err(DecodeError::MisalignedOpenTime(self.open_time));
        }

        if self.close_time - self.open_time != BUCKET_MS - 1 {
            return Err(DecodeError::OhlcInconsistent);
        }

        Ok(())
    }
}
