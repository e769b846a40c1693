use crate::common::CandleKey;

/// 单个批处理窗口因重试耗尽而被跳过后记录的错误
#[derive(Debug, Clone)]
pub struct BackfillErrorRecord {
    pub window_start: i64,
    pub window_end: i64,
    pub reason: String,
}

/// # Summary
/// 单次回填任务的运行时状态。
///
/// # Invariants
/// - `batch_size <= 1500`（上游单次请求的最大返回条数）。
/// - `cursor` 单调递增，任务在 `cursor >= window_end` 或致命错误时终止。
#[derive(Debug, Clone)]
pub struct BackfillJob {
    pub key: CandleKey,
    pub window_start: i64,
    pub window_end: i64,
    pub cursor: i64,
    pub batch_size: i64,
    pub errors: Vec<BackfillErrorRecord>,
}

impl BackfillJob {
    pub fn new(key: CandleKey, window_start: i64, window_end: i64) -> Self {
        Self {
            key,
            window_start,
            window_end,
            cursor: window_start,
            batch_size: 1500,
            errors: Vec::new(),
        }
    }
}

/// # Summary
/// 回填任务完成后返回给调用方的统计报告。
#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub success: bool,
    pub total_candles: u64,
    pub new_candles: u64,
    pub duplicate_candles: u64,
    pub window_start: i64,
    pub window_end: i64,
    pub duration_ms: u64,
    pub errors: Vec<BackfillErrorRecord>,
}
