//! 服务装配

use std::sync::Arc;

use tessera_adapter_redis::{
    RedisCache, RedisInvalidationPublisher, RedisInvalidationSubscriber, create_client,
};
use tessera_bootstrap::{lifecycle_from_config, run_service};
use tessera_cache_core::{
    BulkEvictor, CacheBackedRepository, CacheSettings, EntityCache, InMemoryCache,
    InvalidationListener, LocalEventBus, Namespace,
};
use tessera_config::{AppConfig, CacheConfig, RedisConfig};
use tessera_errors::{AppError, AppResult};
use tessera_ports::{CacheKeyspace, CachePort, InvalidationPublisher};
use tokio::task::JoinHandle;
use tracing::info;

use crate::repository::ProductRepository;
use crate::schema::{product_indexes, product_seed};
use crate::store::{PgProductStore, ProductStore};

/// 缓存存储与失效事件传输
pub struct CacheBackend {
    pub store: Arc<dyn CachePort>,
    pub keyspace: Arc<dyn CacheKeyspace>,
    pub publisher: Arc<dyn InvalidationPublisher>,
    pub bus: LocalEventBus,
    subscriber: Option<JoinHandle<()>>,
}

impl CacheBackend {
    /// 单实例：进程内存储与事件总线
    pub fn local() -> Self {
        let memory = InMemoryCache::new();
        let bus = LocalEventBus::default();
        Self {
            store: Arc::new(memory.clone()),
            keyspace: Arc::new(memory),
            publisher: Arc::new(bus.clone()),
            bus,
            subscriber: None,
        }
    }

    /// 多实例：共享 Redis，事件经 Pub/Sub 转发到本地总线
    pub fn redis(cache: Arc<RedisCache>, config: &RedisConfig) -> AppResult<Self> {
        let bus = LocalEventBus::default();
        let subscriber = RedisInvalidationSubscriber::new(create_client(config)?).spawn(bus.clone());

        Ok(Self {
            publisher: Arc::new(RedisInvalidationPublisher::new(cache.manager())),
            store: cache.clone(),
            keyspace: cache,
            bus,
            subscriber: Some(subscriber),
        })
    }
}

impl Drop for CacheBackend {
    fn drop(&mut self) {
        if let Some(subscriber) = self.subscriber.take() {
            subscriber.abort();
        }
    }
}

pub struct CatalogService {
    pub products: Arc<ProductRepository>,
    listener: JoinHandle<()>,
    _backend: CacheBackend,
}

impl CatalogService {
    /// 命名空间含 `:` 或 glob 元字符时返回校验错误
    pub fn new(
        config: &CacheConfig,
        store: Arc<dyn ProductStore>,
        backend: CacheBackend,
    ) -> AppResult<Self> {
        let entity_type = ProductRepository::ENTITY_TYPE;
        let namespace = Namespace::try_new(&config.namespace, entity_type)?;
        let enabled = config.is_enabled_for(entity_type);
        let settings = CacheSettings {
            enabled,
            default_ttl_secs: config.default_ttl_secs,
        };

        let cache = EntityCache::new(
            namespace,
            backend.store.clone(),
            backend.keyspace.clone(),
            backend.publisher.clone(),
            settings,
        )
        .with_chunk_size(config.scan_chunk_size);

        let listener = Arc::new(InvalidationListener::new(
            &config.namespace,
            BulkEvictor::new(backend.keyspace.clone()).with_chunk_size(config.scan_chunk_size),
        ))
        .spawn(backend.bus.subscribe());

        info!(
            namespace = %config.namespace,
            caching_enabled = enabled,
            "Catalog service assembled"
        );

        Ok(Self {
            products: Arc::new(ProductRepository::new(store, cache)),
            listener,
            _backend: backend,
        })
    }

    /// 运行到失效监听结束
    pub async fn run(self) -> AppResult<()> {
        self.listener
            .await
            .map_err(|e| AppError::internal(format!("Invalidation listener failed: {}", e)))
    }
}

/// 服务入口
pub async fn run(config: AppConfig) -> AppResult<()> {
    let manager = Arc::new(
        lifecycle_from_config(&config)
            .with_seed(Arc::new(product_seed()))
            .with_index_sync(Arc::new(product_indexes()), config.database.sync_indexes),
    );

    run_service(manager, move |handles| async move {
        let backend = match (handles.cache, &config.redis) {
            (Some(cache), Some(redis)) => CacheBackend::redis(cache, redis)?,
            _ => CacheBackend::local(),
        };
        let store = Arc::new(PgProductStore::new(handles.datastore.pool().clone()));

        CatalogService::new(&config.cache, store, backend)?.run().await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewProduct, Product};
    use async_trait::async_trait;
    use std::time::Duration;
    use tessera_common::{Pagination, RequestContext, TenantId};
    use uuid::Uuid;

    /// 只返回空结果的存储
    struct EmptyStore;

    #[async_trait]
    impl ProductStore for EmptyStore {
        async fn find(&self, _org_id: Uuid, _id: Uuid) -> AppResult<Option<Product>> {
            Ok(None)
        }

        async fn list(&self, _org_id: Uuid, _page: &Pagination) -> AppResult<Vec<Product>> {
            Ok(Vec::new())
        }

        async fn insert(&self, _product: &Product) -> AppResult<()> {
            Ok(())
        }

        async fn update(&self, _product: &Product) -> AppResult<bool> {
            Ok(true)
        }

        async fn delete(&self, _org_id: Uuid, _id: Uuid) -> AppResult<bool> {
            Ok(true)
        }
    }

    fn cache_config(disabled: &[&str]) -> CacheConfig {
        CacheConfig {
            namespace: "test".into(),
            disabled_entities: disabled.iter().map(|s| s.to_string()).collect(),
            ..CacheConfig::default()
        }
    }

    #[tokio::test]
    async fn test_mutation_clears_namespace_through_listener() {
        let backend = CacheBackend::local();
        let keyspace = backend.keyspace.clone();
        let service = CatalogService::new(&cache_config(&[]), Arc::new(EmptyStore), backend).unwrap();
        let ctx = RequestContext::new().with_tenant(&TenantId::new());

        service.products.list(&ctx, Pagination::default()).await.unwrap();
        assert_eq!(keyspace.scan(0, "test:product:*", 100).await.unwrap().keys.len(), 1);

        let input = NewProduct {
            sku: "LAMP-001".into(),
            name: "Lamp".into(),
            price_cents: 2900,
        };
        service.products.create(&ctx, input).await.unwrap();

        for _ in 0..200 {
            if keyspace.scan(0, "test:product:*", 100).await.unwrap().keys.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("product namespace was not cleared");
    }

    #[tokio::test]
    async fn test_disabled_entity_bypasses_store() {
        let backend = CacheBackend::local();
        let keyspace = backend.keyspace.clone();
        let service = CatalogService::new(&cache_config(&["product"]), Arc::new(EmptyStore), backend)
                .unwrap();
        let ctx = RequestContext::new().with_tenant(&TenantId::new());

        service.products.list(&ctx, Pagination::default()).await.unwrap();

        assert!(keyspace.scan(0, "test:*:*", 100).await.unwrap().keys.is_empty());
    }

    #[tokio::test]
    async fn test_namespace_with_separator_is_rejected() {
        let config = CacheConfig {
            namespace: "prod:eu".into(),
            ..CacheConfig::default()
        };

        let result = CatalogService::new(&config, Arc::new(EmptyStore), CacheBackend::local());

        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
