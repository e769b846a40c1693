use thiserror::Error;

/// # Summary
/// 流传输层错误枚举，处理连接建立、订阅管理及句柄失效等问题。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum StreamError {
    // 底层 WebSocket 连接建立失败
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    // 帧投递通道已关闭（订阅方已丢弃接收端）
    #[error("frame channel closed")]
    SendClosed,
    // 请求了不支持的流名称或市场
    #[error("unsupported stream: {0}")]
    Unsupported(String),
}
