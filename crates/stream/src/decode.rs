use klineflow_core::candle::entity::Candle;
use klineflow_core::candle::error::DecodeError;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// # Summary
/// 纯函数：将上游原始帧字节解码为经过校验的 Candle。
///
/// # Logic
/// 1. 解析 JSON；若失败，映射为 `NonNumeric`。
/// 2. 同时兼容组合流信封 `{stream,data:{...}}` 与直连信封 `{e,s,k:{...}}`。
/// 3. 提取 `k` 对象中的全部字段，转换为内部类型。
/// 4. 调用 `Candle::validate` 执行全部不变式校验。
///
/// # Arguments
/// * `frame`: 上游 WebSocket 帧的原始 JSON 字节。
///
/// # Returns
/// 校验通过的 `Candle`，或具体的 `DecodeError`；没有半成品 Candle 能逃逸此函数。
pub fn decode(frame: &[u8]) -> Result<Candle, DecodeError> {
    let root: Value = serde_json::from_slice(frame).map_err(|e| DecodeError::NonNumeric {
        field: "root",
        value: e.to_string(),
    })?;

    let envelope = root.get("data").unwrap_or(&root);
    let kline = envelope
        .get("k")
        .ok_or(DecodeError::MissingField("k"))?;

    let open_time = require_i64(kline, "t")?;
    let close_time = require_i64(kline, "T")?;
    let open = require_decimal(kline, "o")?;
    let high = require_decimal(kline, "h")?;
    let low = require_decimal(kline, "l")?;
    let close = require_decimal(kline, "c")?;
    let volume = require_decimal(kline, "v")?;
    let quote_volume = require_decimal(kline, "q")?;
    let taker_buy_base_volume = require_decimal(kline, "V")?;
    let taker_buy_quote_volume = require_decimal(kline, "Q")?;
    let trades = require_i64(kline, "n")?;
    let is_closed = kline
        .get("x")
        .and_then(Value::as_bool)
        .ok_or(DecodeError::MissingField("x"))?;

    let candle = Candle {
        open_time,
        close_time,
        open,
        high,
        low,
        close,
        volume,
        quote_volume,
        taker_buy_base_volume,
        taker_buy_quote_volume,
        trades: i32::try_from(trades).unwrap_or(i32::MAX),
        is_closed,
    };

    candle.validate()?;
    Ok(candle)
}

/// 提取一个整数字段，容忍上游以字符串或数值两种形式发送
fn require_i64(obj: &Value, field: &'static str) -> Result<i64, DecodeError> {
    let value = obj.get(field).ok_or(DecodeError::MissingField(field))?;
    if let Some(n) = value.as_i64() {
        return Ok(n);
    }
    if let Some(s) = value.as_str() {
        return s.parse::<i64>().map_err(|_| DecodeError::NonNumeric {
            field,
            value: s.to_string(),
        });
    }
    Err(DecodeError::NonNumeric {
        field,
        value: value.to_string(),
    })
}

/// 提取一个十进制字段，容忍上游以字符串或数值两种形式发送
fn require_decimal(obj: &Value, field: &'static str) -> Result<Decimal, DecodeError> {
    let value = obj.get(field).ok_or(DecodeError::MissingField(field))?;
    if let Some(s) = value.as_str() {
        return Decimal::from_str(s).map_err(|_| DecodeError::NonNumeric {
            field,
            value: s.to_string(),
        });
    }
    if let Some(n) = value.as_f64() {
        return Decimal::from_str(&n.to_string()).map_err(|_| DecodeError::NonNumeric {
            field,
            value: n.to_string(),
        });
    }
    Err(DecodeError::NonNumeric {
        field,
        value: value.to_string(),
    })
}
