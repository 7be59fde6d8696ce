//! Redis Cache 实现

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tessera_cache_core::CacheError;
use tessera_errors::{AppError, AppResult};
use tessera_ports::{CacheKeyspace, CachePort, ManagedConnection, ScanPage};
use tracing::{debug, info};

use crate::check_connection;

/// Redis Cache
///
/// 关闭后所有操作返回缓存错误，读穿透路径据此退化为直接计算。
pub struct RedisCache {
    conn: ConnectionManager,
    closed: AtomicBool,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            closed: AtomicBool::new(false),
        }
    }

    /// 供发布者等共享同一连接管理器
    pub fn manager(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn connection(&self) -> AppResult<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::StoreUnavailable("Redis client is closed".to_string()).into());
        }
        Ok(self.conn.clone())
    }
}

fn store_error(op: &str, err: redis::RedisError) -> AppError {
    CacheError::StoreUnavailable(format!("Redis {} failed: {}", op, err)).into()
}

#[async_trait]
impl CachePort for RedisCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.connection()?;
        conn.get(key)
            .await
            .map_err(|e| store_error("get", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
        let mut conn = self.connection()?;
        match ttl {
            Some(duration) => conn
                .set_ex(key, value, duration.as_secs().max(1))
                .await
                .map_err(|e| store_error("set", e)),
            None => conn
                .set(key, value)
                .await
                .map_err(|e| store_error("set", e)),
        }
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.connection()?;
        conn.del(key)
            .await
            .map_err(|e| store_error("delete", e))
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let mut conn = self.connection()?;
        conn.exists(key)
            .await
            .map_err(|e| store_error("exists", e))
    }
}

#[async_trait]
impl CacheKeyspace for RedisCache {
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> AppResult<ScanPage> {
        let mut conn = self.connection()?;
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("scan", e))?;

        Ok(ScanPage { cursor, keys })
    }

    async fn unlink(&self, keys: &[String]) -> AppResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let mut conn = self.connection()?;
        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("UNLINK").arg(key);
        }

        let removed: Vec<u64> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| store_error("unlink", e))?;

        debug!(batch = keys.len(), "Redis unlink pipeline executed");
        Ok(removed.into_iter().sum())
    }
}

#[async_trait]
impl ManagedConnection for RedisCache {
    fn name(&self) -> &str {
        "redis"
    }

    async fn ping(&self) -> AppResult<()> {
        let mut conn = self.connection()?;
        check_connection(&mut conn).await
    }

    /// 标记关闭，此后本实例的所有操作返回缓存错误
    ///
    /// `ConnectionManager` 没有显式关闭接口，底层连接在全部克隆释放后断开。
    /// 通过 [`RedisCache::manager`] 共享连接的发布者不受此标记影响，
    /// 订阅任务持有独立的 `Client`，需由持有方中止。
    async fn close(&self) -> AppResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Redis client closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
