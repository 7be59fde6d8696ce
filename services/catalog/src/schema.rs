//! 表结构、索引与初始数据

use tessera_adapter_postgres::{IndexDefinition, PostgresIndexSync, TableSeeder};

pub const PRODUCTS_TABLE: &str = "products";

const CREATE_PRODUCTS: &str = r#"
CREATE TABLE IF NOT EXISTS products (
    id UUID PRIMARY KEY,
    org_id UUID NOT NULL,
    sku VARCHAR(64) NOT NULL,
    name VARCHAR(255) NOT NULL,
    price_cents BIGINT NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// 演示租户（全零 UUID）的初始商品
const SEED_PRODUCTS: &str = r#"
INSERT INTO products (id, org_id, sku, name, price_cents)
VALUES
    ('00000000-0000-7000-8000-000000000001', '00000000-0000-0000-0000-000000000000', 'DESK-001', 'Desk', 19900),
    ('00000000-0000-7000-8000-000000000002', '00000000-0000-0000-0000-000000000000', 'CHAIR-001', 'Chair', 8900),
    ('00000000-0000-7000-8000-000000000003', '00000000-0000-0000-0000-000000000000', 'LAMP-001', 'Lamp', 2900)
ON CONFLICT (id) DO NOTHING
"#;

pub fn product_indexes() -> PostgresIndexSync {
    PostgresIndexSync::new(vec![
        IndexDefinition::new("idx_products_org_sku", PRODUCTS_TABLE, &["org_id", "sku"]).unique(),
        IndexDefinition::new("idx_products_org_updated", PRODUCTS_TABLE, &["org_id", "updated_at"]),
    ])
}

pub fn product_seed() -> TableSeeder {
    TableSeeder::new("catalog-products", PRODUCTS_TABLE)
        .ensure(CREATE_PRODUCTS)
        .statement(SEED_PRODUCTS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ports::SeedRoutine;

    #[test]
    fn test_index_definitions_render() {
        let sql: Vec<String> = product_indexes()
            .definitions()
            .iter()
            .map(|d| d.create_sql().unwrap())
            .collect();

        assert_eq!(sql.len(), 2);
        assert!(sql[0].starts_with("CREATE UNIQUE INDEX IF NOT EXISTS idx_products_org_sku"));
        assert_eq!(product_seed().name(), "catalog-products");
    }
}
