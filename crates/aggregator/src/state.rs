use std::sync::atomic::AtomicI64;

/// # Summary
/// 单个分区键的实时运行态，供 HealthMonitor 与 AdminApi 读取。
pub(crate) struct KeyRuntime {
    pub last_frame_at: AtomicI64,
}

impl KeyRuntime {
    pub fn new() -> Self {
        Self {
            last_frame_at: AtomicI64::new(0),
        }
    }
}
