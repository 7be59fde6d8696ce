//! 缓存化仓储
//!
//! 仓储实现 [`CacheBackedRepository`] 并提供一个 [`EntityCache`]，
//! 即可获得读穿透、键生成、命名空间清除与变更广播。

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tessera_common::RequestContext;
use tessera_errors::{AppError, AppResult};
use tessera_ports::{CacheKeyspace, CachePort, InvalidationPublisher};
use tracing::{debug, error, info, warn};

use crate::{
    BulkEvictor, CacheKeyCodec, CacheSettings, DEFAULT_META_KEYS, InvalidationBroadcaster,
    Namespace, ReadThroughCache, ScopedPattern,
};

/// 实体变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Updated,
    Removed,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Removed => "removed",
        }
    }
}

/// 运维清除操作的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheClearResult {
    pub success: bool,
    pub cleared: u64,
}

impl CacheClearResult {
    pub fn failed() -> Self {
        Self {
            success: false,
            cleared: 0,
        }
    }

    pub fn cleared(count: u64) -> Self {
        Self {
            success: true,
            cleared: count,
        }
    }
}

/// 单个实体的缓存组件集合
#[derive(Clone)]
pub struct EntityCache {
    namespace: Namespace,
    codec: CacheKeyCodec,
    read_through: ReadThroughCache,
    evictor: BulkEvictor,
    broadcaster: InvalidationBroadcaster,
}

impl EntityCache {
    pub fn new(
        namespace: Namespace,
        store: Arc<dyn CachePort>,
        keyspace: Arc<dyn CacheKeyspace>,
        publisher: Arc<dyn InvalidationPublisher>,
        settings: CacheSettings,
    ) -> Self {
        let entity_type = namespace.entity_type().to_string();
        Self {
            codec: CacheKeyCodec::new(&entity_type),
            read_through: ReadThroughCache::new(store, &entity_type, settings),
            evictor: BulkEvictor::new(keyspace),
            broadcaster: InvalidationBroadcaster::new(publisher),
            namespace,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.evictor = self.evictor.with_chunk_size(chunk_size);
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn codec(&self) -> &CacheKeyCodec {
        &self.codec
    }

    pub fn read_through(&self) -> &ReadThroughCache {
        &self.read_through
    }

    pub fn evictor(&self) -> &BulkEvictor {
        &self.evictor
    }

    /// 以命名空间标签为前缀、默认租户元数据生成键
    pub fn key_for(&self, context: &RequestContext) -> AppResult<String> {
        self.codec
            .generate_key(context, self.namespace.tag(), DEFAULT_META_KEYS)
    }

    /// 清除本实体的全部缓存
    pub async fn clear(&self) -> AppResult<u64> {
        self.evictor.evict_namespace(&self.namespace).await
    }

    /// 变更通知：广播失效事件
    ///
    /// 广播失败时退化为仅清除本实例可见的存储；两者都失败才返回错误。
    pub async fn entity_changed(
        &self,
        change: ChangeType,
        entity: &Value,
        context: &RequestContext,
    ) -> AppResult<()> {
        let entity_type = self.namespace.entity_type();
        debug!(
            entity_type = %entity_type,
            change = change.as_str(),
            id = ?entity.get("id"),
            tenant = ?context.tenant_id(),
            "Entity changed"
        );

        match self.broadcaster.broadcast(entity_type).await {
            Ok(()) => Ok(()),
            Err(publish_err) => {
                warn!(
                    entity_type = %entity_type,
                    error = %publish_err,
                    "Invalidation broadcast failed, evicting locally"
                );
                self.clear().await.map(|_| ()).map_err(|evict_err| {
                    AppError::cache(format!(
                        "invalidation failed for {}: publish: {}; evict: {}",
                        entity_type, publish_err, evict_err
                    ))
                })
            }
        }
    }

    /// 运维清除
    ///
    /// 无模式时清除整个实体命名空间；未限定或属于其它命名空间标签的模式被拒绝。
    pub async fn cache_clear(&self, pattern: Option<&str>) -> CacheClearResult {
        let pattern = pattern
            .map(str::to_string)
            .unwrap_or_else(|| self.namespace.pattern());

        let scoped = match ScopedPattern::parse(&pattern) {
            Ok(scoped) => scoped,
            Err(e) => {
                warn!(pattern = %pattern, error = %e, "Rejected cache clear request");
                return CacheClearResult::failed();
            }
        };
        if scoped.tag() != self.namespace.tag() {
            warn!(
                pattern = %pattern,
                namespace = %self.namespace.tag(),
                "Rejected cache clear outside own namespace"
            );
            return CacheClearResult::failed();
        }

        let cleared = match self
            .evictor
            .scan_delete(scoped.as_str(), self.evictor.chunk_size())
            .await
        {
            Ok(cleared) => cleared,
            Err(e) => {
                error!(pattern = %pattern, error = %e, "Cache clear failed");
                return CacheClearResult::failed();
            }
        };

        if let Err(e) = self.broadcaster.broadcast(scoped.entity_type()).await {
            warn!(entity_type = %scoped.entity_type(), error = %e, "Failed to broadcast cache clear");
        }

        info!(pattern = %pattern, cleared, "Cache cleared");
        CacheClearResult::cleared(cleared)
    }
}

/// 缓存化仓储接口
///
/// 实现方只需提供实体类型与 [`EntityCache`]。
pub trait CacheBackedRepository: Send + Sync {
    const ENTITY_TYPE: &'static str;

    fn entity_cache(&self) -> &EntityCache;

    fn get_from_cache_or_db<T, F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl_secs: i64,
    ) -> impl Future<Output = AppResult<Option<T>>> + Send
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = AppResult<Option<T>>> + Send,
    {
        self.entity_cache()
            .read_through()
            .get_or_compute(key, compute, ttl_secs)
    }

    fn generate_cache_key(
        &self,
        context: &RequestContext,
        prefix: &str,
        include_meta_keys: &[&str],
    ) -> AppResult<String> {
        self.entity_cache()
            .codec()
            .generate_key(context, prefix, include_meta_keys)
    }

    /// 默认键：命名空间标签 + 租户元数据
    fn cache_key(&self, context: &RequestContext) -> AppResult<String> {
        self.entity_cache().key_for(context)
    }

    fn clear_model_cache(&self) -> impl Future<Output = AppResult<u64>> + Send {
        self.entity_cache().clear()
    }

    fn entity_changed(
        &self,
        change: ChangeType,
        entity: &Value,
        context: &RequestContext,
    ) -> impl Future<Output = AppResult<()>> + Send {
        self.entity_cache().entity_changed(change, entity, context)
    }

    fn cache_clear(&self, pattern: Option<&str>) -> impl Future<Output = CacheClearResult> + Send {
        self.entity_cache().cache_clear(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryCache, LocalEventBus};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tessera_common::TenantId;
    use tessera_ports::{InvalidationEvent, ScanPage};

    struct FailingPublisher;

    #[async_trait]
    impl InvalidationPublisher for FailingPublisher {
        async fn publish(&self, _event: &InvalidationEvent) -> AppResult<()> {
            Err(AppError::cache("publish: connection refused"))
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InvalidationPublisher for RecordingPublisher {
        async fn publish(&self, event: &InvalidationEvent) -> AppResult<()> {
            self.published.lock().push(event.channel());
            Ok(())
        }
    }

    /// 键空间不可达
    struct DownKeyspace {
        scans: AtomicUsize,
    }

    #[async_trait]
    impl CacheKeyspace for DownKeyspace {
        async fn scan(&self, _cursor: u64, _pattern: &str, _count: usize) -> AppResult<ScanPage> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            Err(AppError::cache("scan: connection refused"))
        }

        async fn unlink(&self, _keys: &[String]) -> AppResult<u64> {
            Err(AppError::cache("unlink: connection refused"))
        }
    }

    struct ProductRepository {
        cache: EntityCache,
    }

    impl CacheBackedRepository for ProductRepository {
        const ENTITY_TYPE: &'static str = "product";

        fn entity_cache(&self) -> &EntityCache {
            &self.cache
        }
    }

    fn repository(
        store: &InMemoryCache,
        publisher: Arc<dyn InvalidationPublisher>,
    ) -> ProductRepository {
        ProductRepository {
            cache: EntityCache::new(
                Namespace::new("prod", ProductRepository::ENTITY_TYPE),
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                publisher,
                CacheSettings::default(),
            ),
        }
    }

    async fn seed(store: &InMemoryCache) {
        for key in ["prod:product:a", "prod:product:b", "prod:order:a", "staging:product:a"] {
            store.set(key, "{}", None).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_generated_keys_fall_under_namespace() {
        let store = InMemoryCache::new();
        let repo = repository(&store, Arc::new(LocalEventBus::default()));
        let ctx = RequestContext::new()
            .with_params(json!({"sku": "A-1"}))
            .with_tenant(&TenantId::new());

        let key = repo.cache_key(&ctx).unwrap();
        assert!(repo.entity_cache().namespace().contains(&key));
        assert_eq!(
            key,
            repo.generate_cache_key(&ctx, "prod", DEFAULT_META_KEYS).unwrap()
        );
    }

    #[tokio::test]
    async fn test_clear_model_cache_is_entity_scoped() {
        let store = InMemoryCache::new();
        seed(&store).await;
        let repo = repository(&store, Arc::new(LocalEventBus::default()));

        assert_eq!(repo.clear_model_cache().await.unwrap(), 2);
        assert!(store.exists("prod:order:a").await.unwrap());
        assert!(store.exists("staging:product:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_entity_changed_publishes_event() {
        let store = InMemoryCache::new();
        seed(&store).await;
        let publisher = Arc::new(RecordingPublisher::default());
        let repo = repository(&store, publisher.clone());

        repo.entity_changed(ChangeType::Updated, &json!({"id": 1}), &RequestContext::new())
            .await
            .unwrap();

        assert_eq!(*publisher.published.lock(), vec!["cache.clean.product"]);
        // 清除由监听端完成
        assert!(store.exists("prod:product:a").await.unwrap());
    }

    #[tokio::test]
    async fn test_entity_changed_falls_back_to_local_eviction() {
        let store = InMemoryCache::new();
        seed(&store).await;
        let repo = repository(&store, Arc::new(FailingPublisher));

        repo.entity_changed(ChangeType::Removed, &json!({"id": 1}), &RequestContext::new())
            .await
            .unwrap();

        assert!(store.keys_matching("prod:product:*").is_empty());
    }

    #[tokio::test]
    async fn test_entity_changed_errors_when_publish_and_evict_fail() {
        let store = InMemoryCache::new();
        let repo = ProductRepository {
            cache: EntityCache::new(
                Namespace::new("prod", "product"),
                Arc::new(store),
                Arc::new(DownKeyspace {
                    scans: AtomicUsize::new(0),
                }),
                Arc::new(FailingPublisher),
                CacheSettings::default(),
            ),
        };

        let err = repo
            .entity_changed(ChangeType::Created, &json!({}), &RequestContext::new())
            .await
            .unwrap_err();
        assert!(err.is_store_failure());
    }

    #[tokio::test]
    async fn test_cache_clear_defaults_to_own_namespace() {
        let store = InMemoryCache::new();
        seed(&store).await;
        let publisher = Arc::new(RecordingPublisher::default());
        let repo = repository(&store, publisher.clone());

        let result = repo.cache_clear(None).await;

        assert_eq!(result, CacheClearResult::cleared(2));
        assert_eq!(*publisher.published.lock(), vec!["cache.clean.product"]);
    }

    #[tokio::test]
    async fn test_cache_clear_rejects_unscoped_and_foreign_patterns() {
        let store = InMemoryCache::new();
        seed(&store).await;
        let publisher = Arc::new(RecordingPublisher::default());
        let repo = repository(&store, publisher.clone());

        assert_eq!(repo.cache_clear(Some("*")).await, CacheClearResult::failed());
        assert_eq!(
            repo.cache_clear(Some("prod:*")).await,
            CacheClearResult::failed()
        );
        assert_eq!(
            repo.cache_clear(Some("staging:product:*")).await,
            CacheClearResult::failed()
        );
        assert_eq!(store.len(), 4);
        assert!(publisher.published.lock().is_empty());
    }

    #[tokio::test]
    async fn test_cache_clear_reports_store_failure() {
        let keyspace = Arc::new(DownKeyspace {
            scans: AtomicUsize::new(0),
        });
        let repo = ProductRepository {
            cache: EntityCache::new(
                Namespace::new("prod", "product"),
                Arc::new(InMemoryCache::new()),
                keyspace.clone(),
                Arc::new(LocalEventBus::default()),
                CacheSettings::default(),
            ),
        };

        assert_eq!(repo.cache_clear(None).await, CacheClearResult::failed());
        assert_eq!(keyspace.scans.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_change_type_wire_names() {
        assert_eq!(serde_json::to_string(&ChangeType::Removed).unwrap(), "\"removed\"");
        assert_eq!(
            serde_json::to_value(CacheClearResult::cleared(3)).unwrap(),
            json!({"success": true, "cleared": 3})
        );
    }
}
