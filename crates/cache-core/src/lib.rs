//! tessera-cache-core - 租户隔离的读穿透缓存
//!
//! - CacheKeyCodec: 由请求上下文生成确定性缓存键
//! - ReadThroughCache: 命中返回，未命中计算并回填
//! - BulkEvictor: 基于 SCAN 游标 + UNLINK 的命名空间批量清除
//! - InvalidationBroadcaster / InvalidationListener: 全网格失效广播
//! - CacheBackedRepository: 实体仓储组合上述能力的静态接口

mod error;
mod evictor;
mod invalidation;
mod key;
mod memory;
mod read_through;
mod repository;
mod stats;

pub use error::*;
pub use evictor::*;
pub use invalidation::*;
pub use key::*;
pub use memory::*;
pub use read_through::*;
pub use repository::*;
