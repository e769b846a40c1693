use klineflow_core::candle::entity::Candle;
use klineflow_core::event::entity::Direction;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// # Summary
/// 高成交量异常：当前成交量是否超过此前最多 10 根已收盘 K 线均值的 3 倍。
///
/// # Arguments
/// * `current`: 刚收盘的 K 线。
/// * `prior_closed`: 此前已收盘的 K 线，按时间顺序排列，不包含 `current`。
///
/// # Returns
/// `Some((current_volume, average_volume, ratio))` 当异常成立；`prior_closed` 为空时不判定。
pub fn detect_high_volume(current: &Candle, prior_closed: &[Candle]) -> Option<(Decimal, Decimal, Decimal)> {
    if prior_closed.is_empty() {
        return None;
    }
    let window = &prior_closed[prior_closed.len().saturating_sub(10)..];
    let sum: Decimal = window.iter().map(|c| c.volume).sum();
    let average = sum / Decimal::from(window.len());
    if average.is_zero() {
        return None;
    }
    let threshold = average * dec!(3);
    if current.volume > threshold {
        let ratio = current.volume / average;
        Some((current.volume, average, ratio))
    } else {
        None
    }
}

/// # Summary
/// 价格剧烈波动异常：`|close - open| / open >= 0.03`。
pub fn detect_price_spike(candle: &Candle) -> Option<(Decimal, Direction)> {
    if candle.open.is_zero() {
        return None;
    }
    let diff = candle.close - candle.open;
    let percent = (diff.abs() / candle.open) * dec!(100);
    if percent >= dec!(3) {
        let direction = if diff >= Decimal::ZERO { Direction::Up } else { Direction::Down };
        Some((percent, direction))
    } else {
        None
    }
}

/// # Summary
/// 缺口异常：`|open - prev.close| / prev.close >= 0.01`。
pub fn detect_gap(current_open: Decimal, prev_close: Decimal) -> Option<(Decimal, Direction)> {
    if prev_close.is_zero() {
        return None;
    }
    let diff = current_open - prev_close;
    let percent = (diff.abs() / prev_close) * dec!(100);
    if percent >= dec!(1) {
        let direction = if diff >= Decimal::ZERO { Direction::Up } else { Direction::Down };
        Some((percent, direction))
    } else {
        None
    }
}
