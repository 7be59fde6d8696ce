//! tessera-bootstrap - 统一服务启动骨架
//!
//! 连接生命周期、连接状态观察、信号处理与服务入口

mod infrastructure;
mod lifecycle;
mod monitor;
mod runtime;
mod starter;

pub use infrastructure::*;
pub use lifecycle::*;
pub use monitor::*;
pub use runtime::*;
pub use starter::*;
