use async_trait::async_trait;
use klineflow_core::backfill::error::BackfillError;
use klineflow_core::backfill::port::KlineRestProvider;
use klineflow_core::candle::entity::Candle;
use klineflow_core::common::CandleKey;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// # Summary
/// 上游历史 K 线 REST 接口的真实实现，按市场基址区分现货/合约端点。
///
/// # Invariants
/// - 使用 `reqwest` 异步客户端，超时固定为 10 秒。
#[derive(Clone)]
pub struct BinanceRestProvider {
    client: Client,
    base_url: String,
}

impl BinanceRestProvider {
    /// # Summary
    /// 创建一个新的 REST 提供者实例。
    ///
    /// # Arguments
    /// * `base_url`: 该市场分段对应的 REST 基址，例如 `https://api.binance.com`。
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build HTTP client"),
            base_url: base_url.into(),
        }
    }
}

/// 单条 12 元组历史 K 线记录，字段顺序固定，详见 §6
#[derive(Deserialize, Debug)]
struct RawKline(
    i64,    // open time
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time
    String, // quote volume
    i64,    // trades
    String, // taker buy base volume
    String, // taker buy quote volume
    serde_json::Value, // ignore
);

fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, BackfillError> {
    Decimal::from_str(raw).map_err(|e| {
        BackfillError::Fatal(format!("unparseable {field} in upstream kline response: {e}"))
    })
}

impl TryFrom<RawKline> for Candle {
    type Error = BackfillError;

    fn try_from(raw: RawKline) -> Result<Self, Self::Error> {
        let candle = Candle {
            open_time: raw.0,
            close_time: raw.6,
            open: parse_decimal("open", &raw.1)?,
            high: parse_decimal("high", &raw.2)?,
            low: parse_decimal("low", &raw.3)?,
            close: parse_decimal("close", &raw.4)?,
            volume: parse_decimal("volume", &raw.5)?,
            quote_volume: parse_decimal("quote_volume", &raw.7)?,
            trades: i32::try_from(raw.8).unwrap_or(i32::MAX),
            taker_buy_base_volume: parse_decimal("taker_buy_base_volume", &raw.9)?,
            taker_buy_quote_volume: parse_decimal("taker_buy_quote_volume", &raw.10)?,
            is_closed: true,
        };
        candle
            .validate()
            .map_err(|e| BackfillError::Fatal(format!("upstream kline failed validation: {e}")))?;
        Ok(candle)
    }
}

#[async_trait]
impl KlineRestProvider for BinanceRestProvider {
    async fn klines(
        &self,
        key: &CandleKey,
        start: i64,
        end: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, BackfillError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", key.symbol.to_uppercase()),
                ("interval", "15m".to_string()),
                ("startTime", start.to_string()),
                ("endTime", (end - 1).to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackfillError::Transient(format!("request timed out: {e}"))
                } else {
                    BackfillError::Transient(format!("request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(BackfillError::Transient(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BackfillError::Fatal(format!("HTTP {status}: {body}")));
        }

        let raw: Vec<RawKline> = resp
            .json()
            .await
            .map_err(|e| BackfillError::Fatal(format!("malformed upstream response: {e}")))?;

        raw.into_iter().map(Candle::try_from).collect()
    }
}
