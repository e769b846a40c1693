use crate::cache::error::CacheError;
use crate::candle::entity::Candle;
use crate::common::CandleKey;

/// # Summary
/// 每分区键有界环形缓存契约，容量为 `MAX_MEMORY_CANDLES`。
///
/// # Invariants
/// - `|cache[key]| <= capacity` 在任意时刻成立。
/// - upsert 与 slice/tail 必须互相安全（无数据竞争）。
/// - 读者可能观察到尚未收盘的尾部 K 线。
pub trait CandleCache: Send + Sync {
    /// # Summary
    /// 插入或更新一条 K 线。
    ///
    /// # Logic
    /// 1. 若环非空且尾部 open_time 等于新值，原地替换尾部（进行中更新）。
    /// 2. 否则若新值 open_time 小于尾部，拒绝写入并返回 `CacheError::OutOfOrder`。
    /// 3. 否则追加；若超出容量，丢弃最旧的一条。
    ///
    /// # Arguments
    /// * `key`: 分区键。
    /// * `candle`: 待写入的 K 线。
    ///
    /// # Returns
    /// 成功返回 Ok，乱序写入返回 `CacheError`。
    fn upsert(&self, key: &CandleKey, candle: Candle) -> Result<(), CacheError>;

    /// # Summary
    /// 获取分区当前尾部 K 线（可能是进行中的）。
    ///
    /// # Returns
    /// O(1) 返回尾部 K 线的克隆，若分区为空返回 None。
    fn tail(&self, key: &CandleKey) -> Option<Candle>;

    /// # Summary
    /// 获取分区最近 `limit` 条 K 线，按时间升序排列。
    ///
    /// # Arguments
    /// * `key`: 分区键。
    /// * `limit`: 返回数量上限。
    ///
    /// # Returns
    /// 最旧的排在最前面的 K 线列表。
    fn slice(&self, key: &CandleKey, limit: usize) -> Vec<Candle>;

    /// # Summary
    /// 用存储层数据批量重建分区内容（启动时回灌）。
    ///
    /// # Logic
    /// 直接替换该分区现有的环形缓冲内容，不做合并。
    ///
    /// # Arguments
    /// * `key`: 分区键。
    /// * `candles`: 按时间升序排列的种子数据，长度不超过容量时全部保留。
    fn load(&self, key: &CandleKey, candles: Vec<Candle>);

    /// 返回该分区当前已缓存的条数
    fn len(&self, key: &CandleKey) -> usize;

    /// 该分区是否为空
    fn is_empty(&self, key: &CandleKey) -> bool {
        self.len(key) == 0
    }
}
