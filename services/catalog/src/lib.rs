//! catalog - 商品目录服务
//!
//! 组合读穿透缓存、变更广播与连接生命周期的参考实体服务

pub mod app;
pub mod domain;
pub mod repository;
pub mod schema;
pub mod store;

pub use app::{CacheBackend, CatalogService, run};
