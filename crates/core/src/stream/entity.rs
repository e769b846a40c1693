use crate::common::CandleKey;
use serde::{Deserialize, Serialize};

/// # Summary
/// 订阅生命周期状态机。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Connecting,
    Open,
    Reconnecting,
    Failed,
}

/// # Summary
/// 单个分区键在某个上游连接上的订阅记录。
///
/// # Invariants
/// - `interval` 固定为 "15m"。
/// - `attempts` 在每次成功 Open 后归零。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSubscription {
    pub key: CandleKey,
    pub interval: &'static str,
    pub state: SubscriptionState,
    // 当前连续失败的重连次数
    pub attempts: u32,
    // 最近一次收到帧的时间（UTC 毫秒）
    pub last_frame_at: i64,
}

impl StreamSubscription {
    pub fn new(key: CandleKey) -> Self {
        Self {
            key,
            interval: "15m",
            state: SubscriptionState::Connecting,
            attempts: 0,
            last_frame_at: 0,
        }
    }
}

/// # Summary
/// 单条物理连接（按 Market 维度）的状态快照。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub market: crate::common::Market,
    pub open: bool,
    pub subscriptions: Vec<String>,
}
