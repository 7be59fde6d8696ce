//! 索引定义同步
//!
//! 仅在运维显式开启时于启动阶段执行，全部使用 `CREATE INDEX IF NOT EXISTS`。

use async_trait::async_trait;
use tessera_errors::{AppError, AppResult};
use tessera_ports::IndexSync;
use tracing::info;

use crate::PostgresDatastore;

/// SQL 标识符校验：字母、数字、下划线，可带一个 schema 前缀
pub(crate) fn validate_identifier(ident: &str) -> AppResult<&str> {
    let valid = !ident.is_empty()
        && ident.split('.').count() <= 2
        && ident.split('.').all(|part| {
            !part.is_empty()
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
                && !part.starts_with(|c: char| c.is_ascii_digit())
        });

    if valid {
        Ok(ident)
    } else {
        Err(AppError::validation(format!("Invalid SQL identifier: {}", ident)))
    }
}

/// 索引定义
#[derive(Debug, Clone)]
pub struct IndexDefinition {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn create_sql(&self) -> AppResult<String> {
        if self.columns.is_empty() {
            return Err(AppError::validation(format!(
                "Index {} has no columns",
                self.name
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| validate_identifier(c))
            .collect::<AppResult<Vec<_>>>()?
            .join(", ");

        Ok(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            validate_identifier(&self.name)?,
            validate_identifier(&self.table)?,
            columns
        ))
    }
}

/// PostgreSQL 索引同步
pub struct PostgresIndexSync {
    definitions: Vec<IndexDefinition>,
}

impl PostgresIndexSync {
    pub fn new(definitions: Vec<IndexDefinition>) -> Self {
        Self { definitions }
    }

    pub fn definitions(&self) -> &[IndexDefinition] {
        &self.definitions
    }
}

#[async_trait]
impl IndexSync<PostgresDatastore> for PostgresIndexSync {
    async fn sync_indexes(&self, datastore: &PostgresDatastore) -> AppResult<usize> {
        for definition in &self.definitions {
            let sql = definition.create_sql()?;
            sqlx::query(&sql)
                .execute(datastore.pool())
                .await
                .map_err(|e| {
                    AppError::database(format!(
                        "Failed to sync index {}: {}",
                        definition.name, e
                    ))
                })?;
        }

        info!(count = self.definitions.len(), "Indexes synchronized");
        Ok(self.definitions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sql() {
        let index = IndexDefinition::new("idx_products_org_sku", "products", &["org_id", "sku"]).unique();
        assert_eq!(
            index.create_sql().unwrap(),
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_products_org_sku ON products (org_id, sku)"
        );
    }

    #[test]
    fn test_identifiers_are_validated() {
        assert!(validate_identifier("catalog.products").is_ok());
        assert!(validate_identifier("products; DROP TABLE x").is_err());
        assert!(validate_identifier("a.b.c").is_err());
        assert!(validate_identifier("1abc").is_err());
        assert!(IndexDefinition::new("idx", "products", &[]).create_sql().is_err());
    }
}
