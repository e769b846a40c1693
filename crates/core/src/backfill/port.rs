use crate::backfill::entity::BackfillReport;
use crate::backfill::error::BackfillError;
use crate::candle::entity::Candle;
use crate::common::CandleKey;
use async_trait::async_trait;

/// # Summary
/// 上游历史 K 线 REST 接口契约。
///
/// # Invariants
/// - 单次请求返回的条数不超过 `limit`。
/// - 429 必须映射为 `BackfillError::Transient`；非 429 的 4xx 映射为 `Fatal`。
#[async_trait]
pub trait KlineRestProvider: Send + Sync {
    /// # Summary
    /// 拉取指定分区键在 `[start, end)` 范围内的历史 K 线。
    ///
    /// # Arguments
    /// * `key`: 分区键。
    /// * `start`: 起始 open_time（毫秒，含）。
    /// * `end`: 结束 open_time（毫秒，不含）。
    /// * `limit`: 本次请求的最大返回条数。
    ///
    /// # Returns
    /// 按 open_time 升序排列的 K 线列表。
    async fn klines(
        &self,
        key: &CandleKey,
        start: i64,
        end: i64,
        limit: u32,
    ) -> Result<Vec<Candle>, BackfillError>;
}

/// # Summary
/// 供 Aggregator（经 `AdminApi`）触发回填任务的契约，解耦对具体
/// BackfillEngine 实现的依赖。
#[async_trait]
pub trait BackfillRunner: Send + Sync {
    /// # Summary
    /// 对指定分区键运行一次 `[window_start, window_end]` 窗口的回填。
    async fn run(&self, key: &CandleKey, window_start: i64, window_end: i64) -> BackfillReport;
}
