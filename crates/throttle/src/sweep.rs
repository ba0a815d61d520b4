//! 后台清扫任务
//!
//! 周期性移除过期的窗口记录和缓存条目，约束内存增长。
//! 任务由持有者显式启动和停止，不随模块加载自动运行

use cuba_common::ShutdownController;
use metrics::counter;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// 可被清扫的组件
pub trait Sweepable: Send + Sync {
    /// 组件名称（用于日志与指标）
    fn name(&self) -> &'static str;

    /// 移除过期状态，返回移除数量
    fn sweep(&self) -> usize;
}

/// 清扫任务句柄
///
/// 持有任务的 JoinHandle 与关闭控制器；`stop` 触发关闭并等待任务退出
pub struct Sweeper {
    handle: Mutex<Option<JoinHandle<()>>>,
    shutdown: ShutdownController,
}

impl Sweeper {
    /// 启动清扫任务
    pub fn spawn(targets: Vec<Arc<dyn Sweepable>>, interval: Duration) -> Self {
        let shutdown = ShutdownController::new();
        let stop = shutdown.clone();

        let handle = tokio::spawn(async move {
            info!(
                interval_secs = interval.as_secs(),
                targets = targets.len(),
                "Starting sweeper"
            );

            let mut ticker = tokio::time::interval(interval);
            // interval 的首个 tick 立即完成，跳过以免启动即空扫
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for target in &targets {
                            let removed = target.sweep();
                            if removed > 0 {
                                debug!(target = target.name(), removed, "Swept expired records");
                            }

                            let labels = [("target", target.name().to_string())];
                            counter!("throttle_swept_records_total", &labels)
                                .increment(removed as u64);
                        }
                    }
                    _ = stop.wait() => {
                        info!("Sweeper stopped");
                        break;
                    }
                }
            }
        });

        Self {
            handle: Mutex::new(Some(handle)),
            shutdown,
        }
    }

    /// 任务是否仍在运行
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// 停止并等待任务退出
    pub async fn stop(&self) {
        self.shutdown.shutdown();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
