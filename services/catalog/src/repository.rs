//! 带缓存的商品仓储

use std::sync::Arc;

use serde_json::json;
use tessera_cache_core::{CacheBackedRepository, CacheError, ChangeType, EntityCache};
use tessera_common::{Pagination, RequestContext};
use tessera_errors::{AppError, AppResult};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{NewProduct, Product, ProductChanges};
use crate::store::ProductStore;

pub struct ProductRepository {
    store: Arc<dyn ProductStore>,
    cache: EntityCache,
}

impl CacheBackedRepository for ProductRepository {
    const ENTITY_TYPE: &'static str = "product";

    fn entity_cache(&self) -> &EntityCache {
        &self.cache
    }
}

fn org_id(context: &RequestContext) -> AppResult<Uuid> {
    context
        .tenant_id()
        .map(|tenant| tenant.0)
        .ok_or_else(|| AppError::validation("Missing org_id in request metadata"))
}

impl ProductRepository {
    pub fn new(store: Arc<dyn ProductStore>, cache: EntityCache) -> Self {
        Self { store, cache }
    }

    fn ttl_secs(&self) -> i64 {
        self.cache.read_through().settings().default_ttl_secs
    }

    /// 以调用方元数据和本次查询参数生成键
    fn query_key(&self, context: &RequestContext, params: serde_json::Value) -> AppResult<String> {
        self.cache_key(&context.clone().with_params(params))
    }

    pub async fn find(&self, context: &RequestContext, id: Uuid) -> AppResult<Option<Product>> {
        let org_id = org_id(context)?;
        let key = self.query_key(context, json!({"op": "find", "id": id}))?;

        self.get_from_cache_or_db(&key, || self.store.find(org_id, id), self.ttl_secs())
            .await
    }

    pub async fn list(&self, context: &RequestContext, page: Pagination) -> AppResult<Vec<Product>> {
        let org_id = org_id(context)?;
        let key = self.query_key(
            context,
            json!({"op": "list", "page": page.page, "page_size": page.page_size}),
        )?;

        let products = self
            .get_from_cache_or_db(
                &key,
                || async move { self.store.list(org_id, &page).await.map(Some) },
                self.ttl_secs(),
            )
            .await?;
        Ok(products.unwrap_or_default())
    }

    pub async fn create(&self, context: &RequestContext, input: NewProduct) -> AppResult<Product> {
        let product = Product::create(org_id(context)?, input);
        self.store.insert(&product).await?;
        debug!(id = %product.id, sku = %product.sku, "Product created");

        self.notify(ChangeType::Created, &product, context).await?;
        Ok(product)
    }

    pub async fn update(
        &self,
        context: &RequestContext,
        id: Uuid,
        changes: ProductChanges,
    ) -> AppResult<Product> {
        let org_id = org_id(context)?;
        let mut product = self
            .store
            .find(org_id, id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("Product {} not found", id)))?;

        product.apply(changes);
        if !self.store.update(&product).await? {
            return Err(AppError::not_found(format!("Product {} not found", id)));
        }

        self.notify(ChangeType::Updated, &product, context).await?;
        Ok(product)
    }

    pub async fn remove(&self, context: &RequestContext, id: Uuid) -> AppResult<()> {
        if !self.store.delete(org_id(context)?, id).await? {
            return Err(AppError::not_found(format!("Product {} not found", id)));
        }

        self.entity_changed(ChangeType::Removed, &json!({"id": id}), context)
            .await
    }

    async fn notify(&self, change: ChangeType, product: &Product, context: &RequestContext) -> AppResult<()> {
        let value = serde_json::to_value(product).map_err(CacheError::from)?;
        self.entity_changed(change, &value, context).await
    }
}
