//! Cache trait 定义

use async_trait::async_trait;
use std::time::Duration;
use tessera_errors::AppResult;

/// 缓存 trait
#[async_trait]
pub trait CachePort: Send + Sync {
    /// 获取缓存值
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// 设置缓存值
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    /// 删除缓存
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// 检查是否存在
    async fn exists(&self, key: &str) -> AppResult<bool>;
}

/// 一页扫描结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// 下一次扫描的游标，0 表示遍历结束
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// 键空间遍历与非阻塞删除
#[async_trait]
pub trait CacheKeyspace: Send + Sync {
    /// 基于游标的非阻塞扫描（SCAN cursor MATCH pattern COUNT count）
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> AppResult<ScanPage>;

    /// 批量非阻塞删除（UNLINK），返回实际删除的键数
    async fn unlink(&self, keys: &[String]) -> AppResult<u64>;
}
