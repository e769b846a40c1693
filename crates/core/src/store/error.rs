use thiserror::Error;

/// # Summary
/// 持久化层错误枚举，处理数据库连接、读写失败及初始化问题。
///
/// # Invariants
/// - 必须通过 `thiserror` 派生 `Error` trait。
#[derive(Error, Debug)]
pub enum StoreError {
    // 底层数据库操作失败
    #[error("database error: {0}")]
    Database(String),
    // 请求的记录未找到
    #[error("not found")]
    NotFound,
    // 存储初始化失败（建库、建表、迁移等）
    #[error("initialization error: {0}")]
    InitError(String),
}
