//! 商品实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub org_id: Uuid,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub updated_at: DateTime<Utc>,
}

/// 新建商品
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
}

/// 部分更新
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub price_cents: Option<i64>,
}

impl Product {
    pub fn create(org_id: Uuid, input: NewProduct) -> Self {
        Self {
            id: Uuid::now_v7(),
            org_id,
            sku: input.sku,
            name: input.name,
            price_cents: input.price_cents,
            updated_at: Utc::now(),
        }
    }

    pub fn apply(&mut self, changes: ProductChanges) {
        if let Some(name) = changes.name {
            self.name = name;
        }
        if let Some(price_cents) = changes.price_cents {
            self.price_cents = price_cents;
        }
        self.updated_at = Utc::now();
    }
}
