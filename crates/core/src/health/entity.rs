use crate::common::CandleKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// # Summary
/// 单个分区键的连通性分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityStatus {
    Connected,
    Stale,
    Disconnected,
}

/// 单个分区键的健康快照条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyHealth {
    pub key: CandleKey,
    pub status: ConnectivityStatus,
    pub last_frame_at: i64,
    pub cache_len: usize,
}

/// # Summary
/// 全量健康快照，按 `HEALTH_CHECK_INTERVAL` 周期生成并发布。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub generated_at: DateTime<Utc>,
    pub keys: Vec<KeyHealth>,
    // 所有分区缓存条目的估计内存占用（字节）
    pub memory_bytes_estimate: u64,
    pub store_healthy: bool,
}
