//! Catalog Service - 商品目录服务入口

use tessera_bootstrap::{RuntimeConfig, init_runtime};
use tessera_config::AppConfig;
use tessera_telemetry::{init_metrics, serve_metrics};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = RuntimeConfig::default();
    let config = AppConfig::load(&runtime.config_dir)?;

    init_runtime(&config);
    let snapshot = match config.telemetry.metrics_addr {
        Some(addr) => {
            serve_metrics(addr)?;
            None
        }
        None => Some(init_metrics()?),
    };

    let result = catalog::run(config).await;
    // 未开启抓取端点时，退出前把指标写进日志
    if let Some(handle) = snapshot {
        debug!(metrics = %handle.render(), "Final metrics snapshot");
    }
    result?;
    Ok(())
}
