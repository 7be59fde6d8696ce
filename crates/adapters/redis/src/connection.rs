//! Redis 连接管理

use std::time::Duration;

use redis::Client;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use secrecy::ExposeSecret;
use tessera_config::RedisConfig;
use tessera_errors::{AppError, AppResult};
use tracing::info;

/// 重连退避上限（毫秒）
const RECONNECT_MAX_DELAY_MS: u64 = 10_000;

pub fn create_client(config: &RedisConfig) -> AppResult<Client> {
    Client::open(config.url.expose_secret().as_str())
        .map_err(|e| AppError::cache(format!("Failed to create Redis client: {}", e)))
}

/// 连接管理器配置：断线后无限重连
pub fn manager_config(config: &RedisConfig) -> ConnectionManagerConfig {
    ConnectionManagerConfig::new()
        .set_number_of_retries(usize::MAX)
        .set_max_delay(RECONNECT_MAX_DELAY_MS)
        .set_connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .set_response_timeout(Duration::from_secs(config.response_timeout_secs))
}

/// 创建 Redis 连接管理器
pub async fn create_connection_manager(config: &RedisConfig) -> AppResult<ConnectionManager> {
    let client = create_client(config)?;

    let manager = ConnectionManager::new_with_config(client, manager_config(config))
        .await
        .map_err(|e| {
            AppError::cache(format!("Failed to create Redis connection manager: {}", e))
        })?;

    info!("Redis connection manager created");
    Ok(manager)
}

/// 检查 Redis 连接
pub async fn check_connection(conn: &mut ConnectionManager) -> AppResult<()> {
    redis::cmd("PING")
        .query_async::<String>(conn)
        .await
        .map_err(|e| AppError::cache(format!("Redis health check failed: {}", e)))?;
    Ok(())
}
