use thiserror::Error;

/// # Summary
/// K 线解码域错误枚举，覆盖字段缺失、类型不匹配及不变式违反。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
/// - 任何变体都不得携带半成品 Candle。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    // 帧中缺失必需字段
    #[error("missing field: {0}")]
    MissingField(&'static str),
    // 字段存在但无法解析为数值
    #[error("non-numeric field {field}: {value}")]
    NonNumeric { field: &'static str, value: String },
    // 价格字段非正
    #[error("non-positive price field: {0}")]
    NonPositivePrice(&'static str),
    // OHLC 大小关系不成立
    #[error("ohlc inconsistent")]
    OhlcInconsistent,
    // 成交量字段为负
    #[error("negative volume field: {0}")]
    NegativeVolume(&'static str),
    // open_time 未按 15 分钟边界对齐
    #[error("misaligned open_time: {0}")]
    MisalignedOpenTime(i64),
}
