use dashmap::DashMap;
use klineflow_core::cache::error::CacheError;
use klineflow_core::cache::port::CandleCache;
use klineflow_core::candle::entity::Candle;
use klineflow_core::common::CandleKey;
use std::collections::VecDeque;
use std::sync::RwLock;
use tracing::warn;

/// # Summary
/// 基于 DashMap 的每分区键有界环形缓存实现。
///
/// # Invariants
/// - 每个分区键的队列长度不超过 `capacity`。
/// - 单个分区键的读写通过 `RwLock` 互斥，不同分区键之间无锁竞争。
pub struct InMemoryCandleCache {
    buffers: DashMap<CandleKey, RwLock<VecDeque<Candle>>>,
    capacity: usize,
}

impl InMemoryCandleCache {
    /// # Summary
    /// 创建一个新的缓存实例。
    ///
    /// # Arguments
    /// * `capacity`: 对应 `MAX_MEMORY_CANDLES`，每个分区键的环形容量。
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity,
        }
    }
}

impl CandleCache for InMemoryCandleCache {
    fn upsert(&self, key: &CandleKey, candle: Candle) -> Result<(), CacheError> {
        let entry = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| RwLock::new(VecDeque::with_capacity(self.capacity)));
        let mut guard = entry.write().unwrap_or_else(|poisoned| poisoned.into_inner());

        match guard.back() {
            Some(tail) if tail.open_time == candle.open_time => {
                let last = guard.len() - 1;
                guard[last] = candle;
            }
            Some(tail) if candle.open_time < tail.open_time => {
                warn!(
                    %key,
                    incoming = candle.open_time,
                    tail = tail.open_time,
                    "rejecting out-of-order candle"
                );
                return Err(CacheError::OutOfOrder {
                    key: key.to_string(),
                    incoming: candle.open_time,
                    tail: tail.open_time,
                });
            }
            _ => {
                guard.push_back(candle);
                if guard.len() > self.capacity {
                    guard.pop_front();
                }
            }
        }
        Ok(())
    }

    fn tail(&self, key: &CandleKey) -> Option<Candle> {
        let entry = self.buffers.get(key)?;
        let guard = entry.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.back().cloned()
    }

    fn slice(&self, key: &CandleKey, limit: usize) -> Vec<Candle> {
        let Some(entry) = self.buffers.get(key) else {
            return Vec::new();
        };
        let guard = entry.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let len = guard.len();
        let skip = len.saturating_sub(limit);
        guard.iter().skip(skip).cloned().collect()
    }

    fn load(&self, key: &CandleKey, candles: Vec<Candle>) {
        let mut deque: VecDeque<Candle> = candles.into();
        while deque.len() > self.capacity {
            deque.pop_front();
        }
        let entry = self
            .buffers
            .entry(key.clone())
            .or_insert_with(|| RwLock::new(VecDeque::with_capacity(self.capacity)));
        let mut guard = entry.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = deque;
    }

    fn len(&self, key: &CandleKey) -> usize {
        self.buffers
            .get(key)
            .map(|e| e.read().unwrap_or_else(|poisoned| poisoned.into_inner()).len())
            .unwrap_or(0)
    }
}
