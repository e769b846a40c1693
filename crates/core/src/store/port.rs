use crate::candle::entity::Candle;
use crate::common::CandleKey;
use crate::store::error::StoreError;
use async_trait::async_trait;

/// # Summary
/// K 线持久化存储契约，按 (symbol, market, open_time) 去重。
///
/// # Invariants
/// - `save` 必须是幂等的：同一 (key, open_time) 重复写入只留一行。
/// - 实时路径与回填路径可并发写入不相交的 open_time，无需额外协调。
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// # Summary
    /// 保存一条已收盘的 K 线（upsert 语义）。
    ///
    /// # Logic
    /// 基于 (symbol, market, open_time) 的唯一索引执行 INSERT ... ON CONFLICT 更新。
    ///
    /// # Returns
    /// 成功返回 Ok，失败返回 `StoreError`。
    async fn save(&self, key: &CandleKey, candle: &Candle) -> Result<(), StoreError>;

    /// # Summary
    /// 按 open_time 精确查找一条 K 线。
    async fn find_by_open_time(
        &self,
        key: &CandleKey,
        open_time: i64,
    ) -> Result<Option<Candle>, StoreError>;

    /// # Summary
    /// 获取该分区最新的 n 条 K 线，按时间降序排列。
    async fn latest(&self, key: &CandleKey, n: usize) -> Result<Vec<Candle>, StoreError>;

    /// # Summary
    /// 获取该分区最早的 n 条 K 线，按时间升序排列。
    async fn earliest(&self, key: &CandleKey, n: usize) -> Result<Vec<Candle>, StoreError>;

    /// # Summary
    /// 获取该分区在 [start, end] 闭区间内的 K 线，按时间升序排列。
    async fn range(
        &self,
        key: &CandleKey,
        start: i64,
        end: i64,
    ) -> Result<Vec<Candle>, StoreError>;

    /// 获取该分区已持久化的总条数
    async fn count(&self, key: &CandleKey) -> Result<i64, StoreError>;

    /// # Summary
    /// 存储层健康检查，供 HealthMonitor 聚合上报。
    ///
    /// # Returns
    /// 存储可正常读写返回 true，否则返回 false（不抛出错误）。
    async fn health_check(&self) -> bool;
}
