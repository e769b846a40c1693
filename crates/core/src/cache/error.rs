use thiserror::Error;

/// # Summary
/// 内存缓存域错误枚举，处理乱序写入等违反环形缓冲不变式的情况。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    // 写入的 open_time 早于当前尾部，违反单调性
    #[error("out of order upsert for {key}: incoming open_time {incoming} < tail open_time {tail}")]
    OutOfOrder {
        key: String,
        incoming: i64,
        tail: i64,
    },
}
