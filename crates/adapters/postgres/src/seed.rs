//! 空表初始数据

use async_trait::async_trait;
use tessera_errors::{AppError, AppResult};
use tessera_ports::SeedRoutine;
use tracing::info;

use crate::PostgresDatastore;
use crate::index::validate_identifier;

/// 表为空时执行的一组写入语句
pub struct TableSeeder {
    name: String,
    table: String,
    /// 检查前执行的幂等 DDL
    ensure: Vec<String>,
    statements: Vec<String>,
}

impl TableSeeder {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            ensure: Vec::new(),
            statements: Vec::new(),
        }
    }

    pub fn ensure(mut self, ddl: impl Into<String>) -> Self {
        self.ensure.push(ddl.into());
        self
    }

    pub fn statement(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    pub(crate) fn emptiness_sql(&self) -> AppResult<String> {
        Ok(format!(
            "SELECT EXISTS (SELECT 1 FROM {} LIMIT 1)",
            validate_identifier(&self.table)?
        ))
    }
}

#[async_trait]
impl SeedRoutine<PostgresDatastore> for TableSeeder {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_empty(&self, datastore: &PostgresDatastore) -> AppResult<bool> {
        for ddl in &self.ensure {
            sqlx::query(ddl)
                .execute(datastore.pool())
                .await
                .map_err(|e| AppError::database(format!("Failed to prepare {}: {}", self.table, e)))?;
        }

        let (has_rows,): (bool,) = sqlx::query_as(&self.emptiness_sql()?)
            .fetch_one(datastore.pool())
            .await
            .map_err(|e| AppError::database(format!("Failed to inspect {}: {}", self.table, e)))?;
        Ok(!has_rows)
    }

    /// 所有语句在同一事务内执行
    async fn seed(&self, datastore: &PostgresDatastore) -> AppResult<u64> {
        let mut tx = datastore
            .pool()
            .begin()
            .await
            .map_err(|e| AppError::database(format!("Failed to begin transaction: {}", e)))?;

        let mut inserted = 0;
        for sql in &self.statements {
            let result = sqlx::query(sql)
                .execute(&mut *tx)
                .await
                .map_err(|e| AppError::database(format!("Seed {} failed: {}", self.name, e)))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| AppError::database(format!("Failed to commit seed: {}", e)))?;

        info!(seed = %self.name, table = %self.table, inserted, "Seed data written");
        Ok(inserted)
    }
}
