//! 缓存路径错误

use tessera_errors::AppError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// 缓存存储不可达
    #[error("cache store unavailable: {0}")]
    StoreUnavailable(String),

    /// 计算结果无法序列化为 JSON
    #[error("failed to serialize cache value: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 未限定命名空间 / 实体的清除模式
    #[error("refusing unscoped eviction pattern '{0}'")]
    UnscopedPattern(String),

    /// 命名空间段为空或含有 `:` / glob 元字符
    #[error("invalid cache namespace '{0}'")]
    InvalidNamespace(String),
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::StoreUnavailable(msg) => AppError::cache(msg),
            CacheError::Serialization(e) => AppError::serialization(e.to_string()),
            e @ (CacheError::UnscopedPattern(_) | CacheError::InvalidNamespace(_)) => {
                AppError::validation(e.to_string())
            }
        }
    }
}
