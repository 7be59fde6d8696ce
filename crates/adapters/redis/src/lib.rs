//! tessera-adapter-redis - Redis 适配器
//!
//! 缓存存储、键空间扫描清除与失效事件的 Pub/Sub 传输

mod cache;
mod connection;
mod pubsub;

pub use cache::*;
pub use connection::*;
pub use pubsub::*;
