//! 外部连接生命周期 trait

use async_trait::async_trait;
use tessera_errors::AppResult;

/// 由服务实例持有、需要在退出时关闭的外部连接
#[async_trait]
pub trait ManagedConnection: Send + Sync + 'static {
    /// 连接名称（用于日志）
    fn name(&self) -> &str;

    /// 连通性检查
    async fn ping(&self) -> AppResult<()>;

    /// 优雅关闭；对已关闭的连接再次调用必须返回 Ok
    async fn close(&self) -> AppResult<()>;

    fn is_closed(&self) -> bool;
}

/// 启动时的数据初始化
#[async_trait]
pub trait SeedRoutine<D: Sync>: Send + Sync {
    fn name(&self) -> &str;

    /// 目标集合是否为空
    async fn is_empty(&self, datastore: &D) -> AppResult<bool>;

    /// 写入初始数据，返回写入条数
    async fn seed(&self, datastore: &D) -> AppResult<u64>;
}

/// 启动时的索引定义同步
#[async_trait]
pub trait IndexSync<D: Sync>: Send + Sync {
    /// 返回本次创建（或确认存在）的索引数
    async fn sync_indexes(&self, datastore: &D) -> AppResult<usize>;
}
