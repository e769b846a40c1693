use crate::candle::entity::Candle;
use crate::common::CandleKey;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// # Summary
/// 异常方向枚举，用于价差类事件的符号标注。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

/// # Summary
/// 事件主题枚举，驱动 EventBus 的按主题路由。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    CandleCompleted,
    CandleSaved,
    CandleSaveFailed,
    CandleHighVolume,
    CandlePriceSpike,
    CandleGapDetected,
    ReconnectFailed,
    BackfillGap,
    AggregatorHealth,
    AggregatorDestroyed,
}

/// # Summary
/// 事件载荷，每个变体对应 §4.7 所列的一个主题。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    CandleCompleted {
        key: CandleKey,
        candle: Candle,
        timeframe: &'static str,
    },
    CandleSaved {
        key: CandleKey,
        candle: Candle,
    },
    CandleSaveFailed {
        key: CandleKey,
        open_time: i64,
        error: String,
    },
    CandleHighVolume {
        key: CandleKey,
        candle: Candle,
        current_volume: Decimal,
        average_volume: Decimal,
        ratio: Decimal,
    },
    CandlePriceSpike {
        key: CandleKey,
        candle: Candle,
        percent: Decimal,
        direction: Direction,
    },
    CandleGapDetected {
        key: CandleKey,
        candle: Candle,
        percent: Decimal,
        direction: Direction,
        prev_close: Decimal,
        current_open: Decimal,
    },
    ReconnectFailed {
        key: CandleKey,
    },
    BackfillGap {
        key: CandleKey,
        window_start: i64,
        window_end: i64,
    },
    AggregatorHealth(crate::health::entity::HealthSnapshot),
    AggregatorDestroyed,
}

impl EventPayload {
    /// 返回该载荷对应的主题，用于发布时按主题路由
    pub fn topic(&self) -> Topic {
        match self {
            EventPayload::CandleCompleted { .. } => Topic::CandleCompleted,
            EventPayload::CandleSaved { .. } => Topic::CandleSaved,
            EventPayload::CandleSaveFailed { .. } => Topic::CandleSaveFailed,
            EventPayload::CandleHighVolume { .. } => Topic::CandleHighVolume,
            EventPayload::CandlePriceSpike { .. } => Topic::CandlePriceSpike,
            EventPayload::CandleGapDetected { .. } => Topic::CandleGapDetected,
            EventPayload::ReconnectFailed { .. } => Topic::ReconnectFailed,
            EventPayload::BackfillGap { .. } => Topic::BackfillGap,
            EventPayload::AggregatorHealth(_) => Topic::AggregatorHealth,
            EventPayload::AggregatorDestroyed => Topic::AggregatorDestroyed,
        }
    }
}

/// # Summary
/// 事件信封，携带通用元数据与变体载荷。
///
/// # Invariants
/// - `event_id` 全局唯一。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub emitted_at: DateTime<Utc>,
    // 发出该事件的服务名，便于多服务环境下溯源
    pub service: String,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(service: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            emitted_at: Utc::now(),
            service: service.into(),
            payload,
        }
    }

    pub fn topic(&self) -> Topic {
        self.payload.topic()
    }
}
