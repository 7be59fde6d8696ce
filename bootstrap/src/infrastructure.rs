//! 基础设施连接
//!
//! PostgreSQL 必需，Redis 按配置可选

use async_trait::async_trait;
use tessera_adapter_postgres::{PostgresConfig, PostgresDatastore};
use tessera_adapter_redis::{RedisCache, create_connection_manager};
use tessera_config::{AppConfig, RedisConfig};
use tessera_errors::AppResult;
use tracing::info;

use crate::{ConnectionFactory, ConnectionLifecycleManager};

/// 生产环境的连接工厂
pub struct InfrastructureFactory {
    postgres: PostgresConfig,
    redis: Option<RedisConfig>,
}

impl InfrastructureFactory {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            postgres: PostgresConfig::from(&config.database),
            redis: config.redis.clone(),
        }
    }

    pub fn has_cache(&self) -> bool {
        self.redis.is_some()
    }

    pub fn redis_config(&self) -> Option<&RedisConfig> {
        self.redis.as_ref()
    }
}

#[async_trait]
impl ConnectionFactory for InfrastructureFactory {
    type Datastore = PostgresDatastore;
    type Cache = RedisCache;

    async fn open_datastore(&self) -> AppResult<PostgresDatastore> {
        PostgresDatastore::connect(&self.postgres).await
    }

    async fn open_cache(&self) -> AppResult<Option<RedisCache>> {
        let Some(redis) = &self.redis else {
            info!("Redis not configured, caching runs without a shared store");
            return Ok(None);
        };
        let conn = create_connection_manager(redis).await?;
        Ok(Some(RedisCache::new(conn)))
    }
}

/// 按配置构建生命周期管理器
pub fn lifecycle_from_config(config: &AppConfig) -> ConnectionLifecycleManager<InfrastructureFactory> {
    ConnectionLifecycleManager::new(InfrastructureFactory::from_config(config))
}
