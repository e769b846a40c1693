use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// # Summary
/// 市场分段枚举，区分现货与合约两条正交的数据分区。
///
/// # Invariants
/// - 同一 symbol 在不同 Market 下视为完全独立的分区。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Market {
    Spot,
    Futures,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::Spot => write!(f, "SPOT"),
            Market::Futures => write!(f, "FUTURES"),
        }
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SPOT" => Ok(Market::Spot),
            "FUTURES" => Ok(Market::Futures),
            other => Err(format!("Unknown market: {other}")),
        }
    }
}

/// # Summary
/// K 线分区键，由交易对符号与市场分段组成。
///
/// # Invariants
/// - `symbol` 在同一 Market 分区内唯一标识一条 K 线序列。
/// - open_time 在该分区内必须唯一。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandleKey {
    // 交易对符号，例如 BTCUSDT
    pub symbol: String,
    // 所属市场分段
    pub market: Market,
}

impl CandleKey {
    /// 构造一个新的分区键
    pub fn new(symbol: impl Into<String>, market: Market) -> Self {
        Self {
            symbol: symbol.into(),
            market,
        }
    }

    /// 用于多路复用流名称，例如 `btcusdt@kline_15m`
    pub fn stream_name(&self, interval: &str) -> String {
        format!("{}@kline_{}", self.symbol.to_lowercase(), interval)
    }
}

impl fmt::Display for CandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.market, self.symbol)
    }
}
