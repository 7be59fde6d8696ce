//! tessera-config - 配置加载库
//!
//! 加载顺序：`default.toml` -> `{APP_ENV}.toml` -> `TESSERA_` 前缀环境变量（`__` 分隔层级）

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;

use secrecy::Secret;
use std::net::SocketAddr;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "TESSERA_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// 数据库配置
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// 获取连接超时（秒）
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// 空闲连接回收时间（秒）
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// 单条语句执行超时（秒），0 表示不限制
    #[serde(default = "default_statement_timeout_secs")]
    pub statement_timeout_secs: u64,
    /// 启动时同步索引定义（运维显式开启）
    #[serde(default)]
    pub sync_indexes: bool,
}

fn default_max_connections() -> u32 {
    // 开发环境: 10, 生产环境: 50
    match std::env::var("APP_ENV").as_deref() {
        Ok("production") => 50,
        _ => 10,
    }
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_statement_timeout_secs() -> u64 {
    30
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    #[serde(default = "default_redis_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_redis_response_timeout_secs")]
    pub response_timeout_secs: u64,
}

fn default_redis_connection_timeout_secs() -> u64 {
    10
}

fn default_redis_response_timeout_secs() -> u64 {
    5
}

/// 缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 最外层键前缀（部署环境或租户标签）
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: i64,
    #[serde(default = "default_scan_chunk_size")]
    pub scan_chunk_size: usize,
    /// 不使用缓存的实体类型
    #[serde(default)]
    pub disabled_entities: Vec<String>,
}

fn default_namespace() -> String {
    std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string())
}

fn default_ttl_secs() -> i64 {
    60
}

fn default_scan_chunk_size() -> usize {
    500
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            default_ttl_secs: default_ttl_secs(),
            scan_chunk_size: default_scan_chunk_size(),
            disabled_entities: Vec::new(),
        }
    }
}

/// 命名空间与实体类型中不允许出现的字符：层级分隔符与 glob 元字符
pub const RESERVED_KEY_CHARS: &[char] = &[':', '*', '?', '[', ']', '\\'];

impl CacheConfig {
    /// 命名空间必须是非空字面量
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() || self.namespace.contains(RESERVED_KEY_CHARS) {
            return Err(ConfigError::Invalid(format!(
                "cache.namespace must be non-empty and must not contain ':' or glob characters: {:?}",
                self.namespace
            )));
        }
        Ok(())
    }

    /// 实体是否启用缓存
    pub fn is_enabled_for(&self, entity_type: &str) -> bool {
        !self
            .disabled_entities
            .iter()
            .any(|disabled| disabled == entity_type)
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// JSON 格式日志
    #[serde(default)]
    pub json: bool,
    /// Prometheus 抓取地址，未配置时不对外暴露指标
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json: false,
            metrics_addr: None,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    pub database: DatabaseConfig,
    /// 未配置时实例不持有缓存客户端
    pub redis: Option<RedisConfig>,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_app_env() -> String {
    "development".to_string()
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| default_app_env());

        let config: Self = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.cache.validate()?;

        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
