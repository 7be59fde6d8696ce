//! ports - 抽象 trait 层
//!
//! 缓存存储、键空间、连接生命周期与失效广播的抽象接口

mod cache;
mod connection;
mod invalidation;

pub use cache::*;
pub use connection::*;
pub use invalidation::*;
