//! 命名空间批量清除
//!
//! SCAN 游标遍历 + 每批一次 UNLINK，不使用阻塞的 KEYS / DEL。
//! 扫描期间新写入的键可能漏删，属于可接受的短暂过期窗口。

use std::sync::Arc;

use tessera_errors::AppResult;
use tessera_ports::CacheKeyspace;
use tracing::{debug, info};

use crate::{CacheError, Namespace, stats};

/// 默认每批扫描的键数
pub const DEFAULT_SCAN_CHUNK: usize = 500;

const GLOB_META: &[char] = &['*', '?', '[', ']', '\\'];

/// 已校验的清除模式 `{tag}:{entity_type}:{rest}`
///
/// tag 与 entity_type 必须是非空字面量，防止一次清除跨越环境或实体。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedPattern {
    pattern: String,
    tag: String,
    entity_type: String,
}

impl ScopedPattern {
    pub fn parse(pattern: &str) -> Result<Self, CacheError> {
        let mut segments = pattern.splitn(3, ':');
        let tag = segments.next().unwrap_or_default();
        let entity_type = segments.next().unwrap_or_default();
        let rest = segments.next();

        let is_literal = |s: &str| !s.is_empty() && !s.contains(GLOB_META);
        if rest.is_none() || !is_literal(tag) || !is_literal(entity_type) {
            return Err(CacheError::UnscopedPattern(pattern.to_string()));
        }

        Ok(Self {
            pattern: pattern.to_string(),
            tag: tag.to_string(),
            entity_type: entity_type.to_string(),
        })
    }

    pub fn for_namespace(namespace: &Namespace) -> Result<Self, CacheError> {
        Self::parse(&namespace.pattern())
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }
}

/// 批量清除器
#[derive(Clone)]
pub struct BulkEvictor {
    keyspace: Arc<dyn CacheKeyspace>,
    chunk_size: usize,
}

impl BulkEvictor {
    pub fn new(keyspace: Arc<dyn CacheKeyspace>) -> Self {
        Self {
            keyspace,
            chunk_size: DEFAULT_SCAN_CHUNK,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// 删除匹配 `pattern` 的全部键，返回删除数量
    ///
    /// 未限定命名空间的模式在访问存储之前即被拒绝。
    pub async fn scan_delete(&self, pattern: &str, chunk_size: usize) -> AppResult<u64> {
        let scoped = ScopedPattern::parse(pattern)?;
        let count = chunk_size.max(1);

        let mut cursor = 0;
        let mut removed = 0;
        let mut batches = 0;
        loop {
            let page = self.keyspace.scan(cursor, scoped.as_str(), count).await?;
            if !page.keys.is_empty() {
                removed += self.keyspace.unlink(&page.keys).await?;
                batches += 1;
            }
            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }

        stats::record_evicted(scoped.entity_type(), removed);
        debug!(pattern = %scoped.as_str(), batches, "Scan delete finished");
        info!(pattern = %scoped.as_str(), removed, "Cache keys evicted");

        Ok(removed)
    }

    /// 清除整个实体命名空间
    pub async fn evict_namespace(&self, namespace: &Namespace) -> AppResult<u64> {
        self.scan_delete(&namespace.pattern(), self.chunk_size).await
    }
}
