//! Graceful Shutdown

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::info;

/// Shutdown 控制器
///
/// 触发一次后永久保持触发状态，`wait` 在触发之后调用也会立即返回
#[derive(Clone)]
pub struct ShutdownController {
    inner: Arc<Inner>,
}

struct Inner {
    triggered: AtomicBool,
    notify: Notify,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                triggered: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// 触发关闭
    pub fn shutdown(&self) {
        info!("Triggering shutdown");
        self.inner.triggered.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// 是否已触发
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// 等待关闭信号
    pub async fn wait(&self) {
        // 先注册 waiter 再检查标志，避免 shutdown 恰好在两者之间触发时丢失唤醒
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.is_triggered() {
            return;
        }
        notified.await;
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
