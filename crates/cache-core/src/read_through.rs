//! 读穿透缓存

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tessera_errors::AppResult;
use tessera_ports::CachePort;
use tracing::{debug, warn};

use crate::CacheError;
use crate::stats;

/// 默认缓存时间（秒）
pub const DEFAULT_TTL_SECS: i64 = 60;

/// 实体级缓存设置
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// 为 false 时完全绕过缓存存储
    pub enabled: bool,
    pub default_ttl_secs: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl CacheSettings {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// 实际写入存储的过期时间，最少 1 秒
pub fn effective_ttl(ttl_secs: i64) -> Duration {
    Duration::from_secs(ttl_secs.max(1) as u64)
}

/// get-or-compute-and-store
///
/// 同一个键的并发未命中不做合并，各自计算并写入（后写覆盖）。
#[derive(Clone)]
pub struct ReadThroughCache {
    store: Arc<dyn CachePort>,
    settings: CacheSettings,
    entity: String,
}

impl ReadThroughCache {
    pub fn new(store: Arc<dyn CachePort>, entity: impl Into<String>, settings: CacheSettings) -> Self {
        Self {
            store,
            settings,
            entity: entity.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// 命中则返回缓存值，否则执行 `compute` 并回填
    ///
    /// `compute` 返回 `None` 时不写缓存；空集合照常写入。
    /// 缓存存储的读写失败只记录日志，结果仍来自 `compute`。
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl_secs: i64,
    ) -> AppResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<Option<T>>> + Send,
    {
        if !self.settings.enabled {
            return compute().await;
        }

        match self.store.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    debug!(key = %key, entity = %self.entity, "Cache hit");
                    stats::record_hit(&self.entity);
                    return Ok(Some(value));
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                    stats::record_miss(&self.entity);
                }
            },
            Ok(None) => {
                debug!(key = %key, entity = %self.entity, "Cache miss");
                stats::record_miss(&self.entity);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed, computing directly");
                stats::record_store_error(&self.entity, "get");
            }
        }

        let value = compute().await?;

        if let Some(value) = &value {
            let raw = serde_json::to_string(value).map_err(CacheError::from)?;
            if let Err(e) = self.store.set(key, &raw, Some(effective_ttl(ttl_secs))).await {
                warn!(key = %key, error = %e, "Cache write failed, returning computed value");
                stats::record_store_error(&self.entity, "set");
            }
        }

        Ok(value)
    }

    /// 使用默认 TTL
    pub async fn get_or_compute_default<T, F, Fut>(&self, key: &str, compute: F) -> AppResult<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<Option<T>>> + Send,
    {
        self.get_or_compute(key, compute, self.settings.default_ttl_secs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryCache;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_errors::AppError;

    /// 所有操作都失败的存储
    struct UnreachableCache {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CachePort for UnreachableCache {
        async fn get(&self, _key: &str) -> AppResult<Option<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::cache("connection refused"))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> AppResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(AppError::cache("connection refused"))
        }

        async fn delete(&self, _key: &str) -> AppResult<()> {
            Err(AppError::cache("connection refused"))
        }

        async fn exists(&self, _key: &str) -> AppResult<bool> {
            Err(AppError::cache("connection refused"))
        }
    }

    /// 读正常、写失败
    struct ReadOnlyCache {
        inner: InMemoryCache,
    }

    #[async_trait]
    impl CachePort for ReadOnlyCache {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> AppResult<()> {
            Err(AppError::cache("READONLY You can't write against a read only replica"))
        }

        async fn delete(&self, key: &str) -> AppResult<()> {
            self.inner.delete(key).await
        }

        async fn exists(&self, key: &str) -> AppResult<bool> {
            self.inner.exists(key).await
        }
    }

    fn cache_over(store: Arc<dyn CachePort>) -> ReadThroughCache {
        ReadThroughCache::new(store, "product", CacheSettings::default())
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let store = InMemoryCache::new();
        let cache = cache_over(Arc::new(store.clone()));
        let computed = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Option<Value> = cache
                .get_or_compute(
                    "prod:product:k1",
                    || async {
                        computed.fetch_add(1, Ordering::SeqCst);
                        Ok(Some(json!({"a": 1})))
                    },
                    60,
                )
                .await
                .unwrap();
            assert_eq!(value, Some(json!({"a": 1})));
        }

        assert_eq!(computed.load(Ordering::SeqCst), 1);
        assert_eq!(store.ttl_of("prod:product:k1"), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_empty_containers_are_cached() {
        let store = InMemoryCache::new();
        let cache = cache_over(Arc::new(store.clone()));

        for (key, empty) in [("prod:product:list", json!([])), ("prod:product:obj", json!({}))] {
            let computed = AtomicUsize::new(0);
            for _ in 0..2 {
                let value: Option<Value> = cache
                    .get_or_compute(
                        key,
                        || async {
                            computed.fetch_add(1, Ordering::SeqCst);
                            Ok(Some(empty.clone()))
                        },
                        60,
                    )
                    .await
                    .unwrap();
                assert_eq!(value, Some(empty.clone()));
            }
            assert_eq!(computed.load(Ordering::SeqCst), 1, "{} should be cached", key);
        }
    }

    #[tokio::test]
    async fn test_none_is_never_cached() {
        let store = InMemoryCache::new();
        let cache = cache_over(Arc::new(store.clone()));
        let computed = AtomicUsize::new(0);

        for _ in 0..2 {
            let value: Option<Vec<String>> = cache
                .get_or_compute(
                    "prod:product:missing",
                    || async {
                        computed.fetch_add(1, Ordering::SeqCst);
                        Ok(None)
                    },
                    60,
                )
                .await
                .unwrap();
            assert!(value.is_none());
        }

        assert_eq!(computed.load(Ordering::SeqCst), 2);
        assert!(!store.exists("prod:product:missing").await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_is_clamped_to_one_second() {
        let store = InMemoryCache::new();
        let cache = cache_over(Arc::new(store.clone()));

        for (key, ttl) in [("prod:product:zero", 0), ("prod:product:negative", -5)] {
            let _: Option<i32> = cache
                .get_or_compute(key, || async { Ok(Some(1)) }, ttl)
                .await
                .unwrap();
            assert_eq!(store.ttl_of(key), Some(Duration::from_secs(1)));
        }

        assert_eq!(effective_ttl(i64::MIN), Duration::from_secs(1));
        assert_eq!(effective_ttl(90), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_disabled_cache_never_touches_store() {
        let store = Arc::new(UnreachableCache {
            calls: AtomicUsize::new(0),
        });
        let cache = ReadThroughCache::new(store.clone(), "audit_log", CacheSettings::disabled());

        let value: Option<i32> = cache
            .get_or_compute("prod:audit_log:k", || async { Ok(Some(7)) }, 60)
            .await
            .unwrap();

        assert_eq!(value, Some(7));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_outage_falls_back_to_compute() {
        let store = Arc::new(UnreachableCache {
            calls: AtomicUsize::new(0),
        });
        let cache = cache_over(store.clone());

        let value: Option<String> = cache
            .get_or_compute("prod:product:k", || async { Ok(Some("db".to_string())) }, 60)
            .await
            .unwrap();

        assert_eq!(value.as_deref(), Some("db"));
        // 一次读 + 一次写，均失败但不影响结果
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_write_failure_still_returns_value() {
        let cache = cache_over(Arc::new(ReadOnlyCache {
            inner: InMemoryCache::new(),
        }));

        let value: Option<u32> = cache
            .get_or_compute("prod:product:k", || async { Ok(Some(3)) }, 60)
            .await
            .unwrap();

        assert_eq!(value, Some(3));
    }

    #[tokio::test]
    async fn test_compute_error_is_not_masked() {
        let cache = cache_over(Arc::new(UnreachableCache {
            calls: AtomicUsize::new(0),
        }));

        let result: AppResult<Option<u32>> = cache
            .get_or_compute(
                "prod:product:k",
                || async { Err(AppError::database("relation \"products\" does not exist")) },
                60,
            )
            .await;

        assert!(matches!(result, Err(AppError::Database(_))));
    }

    #[tokio::test]
    async fn test_unserializable_value_propagates() {
        let store = InMemoryCache::new();
        let cache = cache_over(Arc::new(store.clone()));

        let result: AppResult<Option<HashMap<(u8, u8), u8>>> = cache
            .get_or_compute(
                "prod:product:grid",
                || async { Ok(Some(HashMap::from([((1, 2), 3)]))) },
                60,
            )
            .await;

        assert!(matches!(result, Err(AppError::Serialization(_))));
        assert!(!store.exists("prod:product:grid").await.unwrap());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_recomputed() {
        let store = InMemoryCache::new();
        store
            .set("prod:product:k", "not json", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        let cache = cache_over(Arc::new(store.clone()));

        let value: Option<u32> = cache
            .get_or_compute("prod:product:k", || async { Ok(Some(5)) }, 60)
            .await
            .unwrap();

        assert_eq!(value, Some(5));
        assert_eq!(store.get("prod:product:k").await.unwrap().as_deref(), Some("5"));
    }
}
