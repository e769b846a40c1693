use thiserror::Error;

/// # Summary
/// 回填域错误枚举，区分可重试的瞬时故障与应终止任务的致命故障。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug, Clone)]
pub enum BackfillError {
    // 瞬时故障：429、超时、5xx，按退避策略重试
    #[error("transient upstream error: {0}")]
    Transient(String),
    // 致命故障：非 429 的 4xx，终止任务
    #[error("fatal upstream error: {0}")]
    Fatal(String),
    // 任务启动前的配置校验失败（未知 symbol、非法窗口等）
    #[error("invalid job configuration: {0}")]
    InvalidConfig(String),
}
