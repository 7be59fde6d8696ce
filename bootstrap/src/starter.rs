//! 服务启动器

use std::future::Future;
use std::sync::Arc;

use tessera_errors::{AppError, AppResult};
use tracing::{error, info};

use crate::{ConnectionFactory, ConnectionHandles, ConnectionLifecycleManager};

/// 运行服务
///
/// 1. 启动连接生命周期（带重试）
/// 2. 把连接句柄交给 `service` 构建并运行服务主体
/// 3. 服务主体结束时主动停止；收到信号时由生命周期关闭连接并退出
///
/// ```ignore
/// let manager = Arc::new(lifecycle_from_config(&config));
/// run_service(manager, |handles| async move {
///     let repo = ProductRepository::new(handles.datastore.pool().clone(), cache);
///     serve(repo).await
/// })
/// .await?;
/// ```
pub async fn run_service<F, S, Fut>(manager: Arc<ConnectionLifecycleManager<F>>, service: S) -> AppResult<()>
where
    F: ConnectionFactory,
    S: FnOnce(ConnectionHandles<F::Datastore, F::Cache>) -> Fut,
    Fut: Future<Output = AppResult<()>>,
{
    manager.start().await?;

    let handles = manager
        .handles()
        .await
        .ok_or_else(|| AppError::internal("Connections closed before the service started"))?;

    info!("Service running");

    let result = tokio::select! {
        result = service(handles) => {
            if let Err(e) = &result {
                error!(error = %e, "Service stopped with error");
            }
            if let Err(e) = manager.stop().await {
                error!(error = %e, "Failed to close connections");
            }
            result
        }
        _ = manager.wait_stopped() => Ok(()),
    };

    info!("Service stopped");
    result
}
