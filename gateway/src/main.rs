//! Cuba Throttle Gateway
//!
//! 进程内用量计量与限流服务

mod rate_limit;
mod routing;
mod state;

use cuba_common::system_clock;
use cuba_config::AppConfig;
use cuba_telemetry::{MetricsRecorder, init_tracing};
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // 加载配置
    let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let config = AppConfig::load(&config_dir)?;

    // 初始化 tracing 与 metrics
    init_tracing(&config.telemetry.log_level, config.telemetry.json_logs);
    let metrics = Arc::new(MetricsRecorder::new());

    // 组装限流组件并启动清扫任务
    let state = AppState::build(config.limits.clone(), metrics, system_clock());
    let sweeper = state.sweeper.clone();

    let app = routing::build_router(state);

    // 启动服务器
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!(%addr, app = %config.app_name, env = %config.app_env, "Starting throttle gateway");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 服务退出后停掉清扫任务
    sweeper.stop().await;
    info!("Gateway stopped");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received ctrl-c, shutting down");
}
