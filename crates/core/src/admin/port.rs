use crate::backfill::entity::BackfillReport;
use crate::candle::entity::Candle;
use crate::store::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 按分区键聚合的统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStatistics {
    pub symbol: String,
    pub total_candles: i64,
    pub first_time: Option<i64>,
    pub last_time: Option<i64>,
}

/// `statistics()` 的返回载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub total_candles_per_key: Vec<KeyStatistics>,
    pub first_time: Option<i64>,
    pub last_time: Option<i64>,
}

/// # Summary
/// 外部 HTTP 层将要实现/消费的管理接口契约（仅形状，不含传输层）。
///
/// # Invariants
/// - 本 trait 不携带任何 HTTP 框架依赖；具体路由、鉴权、序列化格式由外部传输层自行决定。
#[async_trait]
pub trait AdminApi: Send + Sync {
    /// 返回该 symbol 当前最新的 K 线（进行中或刚收盘）
    async fn latest(&self, symbol: &str) -> Result<Option<Candle>, StoreError>;

    /// 返回该 symbol 的历史 K 线，可选时间窗口
    async fn history(
        &self,
        symbol: &str,
        limit: usize,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> Result<Vec<Candle>, StoreError>;

    /// 返回全局统计信息
    async fn statistics(&self) -> Result<Statistics, StoreError>;

    /// 新增对该 symbol 的实时订阅
    async fn subscribe(&self, symbol: &str) -> Result<(), StoreError>;

    /// 取消对该 symbol 的实时订阅
    async fn unsubscribe(&self, symbol: &str) -> Result<(), StoreError>;

    /// 对该 symbol 执行全量回填
    async fn backfill_all(&self, symbol: &str) -> BackfillReport;

    /// 对该 symbol 执行指定窗口的回填
    async fn backfill_range(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BackfillReport;

    /// 返回该 symbol 的数据覆盖统计（用于判断是否需要回填）
    async fn data_stats(&self, symbol: &str) -> Result<KeyStatistics, StoreError>;
}
