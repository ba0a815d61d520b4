//! cuba-telemetry - 可观测性库

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 初始化 tracing
///
/// `RUST_LOG` 优先于配置的级别；json 为 true 时输出 JSON 行日志
pub fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Metrics 记录器
///
/// 安装进程级 Prometheus recorder 并持有渲染句柄。
/// 每个进程只能安装一次
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("Failed to install Prometheus recorder");

        Self { handle }
    }

    /// 获取 Prometheus 格式的 metrics
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}
