//! 商品持久化

use async_trait::async_trait;
use sqlx::PgPool;
use tessera_common::Pagination;
use tessera_errors::{AppError, AppResult};
use uuid::Uuid;

use crate::domain::Product;

/// 将 sqlx 错误转换为 AppError
fn map_sqlx_error(e: sqlx::Error) -> AppError {
    AppError::database(e.to_string())
}

#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn find(&self, org_id: Uuid, id: Uuid) -> AppResult<Option<Product>>;

    async fn list(&self, org_id: Uuid, page: &Pagination) -> AppResult<Vec<Product>>;

    async fn insert(&self, product: &Product) -> AppResult<()>;

    /// 返回是否命中一行
    async fn update(&self, product: &Product) -> AppResult<bool>;

    async fn delete(&self, org_id: Uuid, id: Uuid) -> AppResult<bool>;
}

pub struct PgProductStore {
    pool: PgPool,
}

impl PgProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductStore for PgProductStore {
    async fn find(&self, org_id: Uuid, id: Uuid) -> AppResult<Option<Product>> {
        sqlx::query_as::<_, Product>(
            r#"
            SELECT id, org_id, sku, name, price_cents, updated_at
            FROM products WHERE org_id = $1 AND id = $2
            "#,
        )
        .bind(org_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn list(&self, org_id: Uuid, page: &Pagination) -> AppResult<Vec<Product>> {
        sqlx::query_as::<_, Product>(
            r#"
            SELECT id, org_id, sku, name, price_cents, updated_at
            FROM products WHERE org_id = $1
            ORDER BY sku
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(org_id)
        .bind(i64::from(page.page_size))
        .bind(i64::from(page.offset()))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn insert(&self, product: &Product) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, org_id, sku, name, price_cents, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(product.id)
        .bind(product.org_id)
        .bind(&product.sku)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn update(&self, product: &Product) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE products
            SET name = $3, price_cents = $4, updated_at = $5
            WHERE org_id = $1 AND id = $2
            "#,
        )
        .bind(product.org_id)
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price_cents)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, org_id: Uuid, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM products WHERE org_id = $1 AND id = $2")
            .bind(org_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }
}
