//! 时钟抽象
//!
//! 限流窗口和缓存过期的统一时间来源。通过注入时钟，
//! 测试可以显式推进时间而无需 sleep

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// 时钟 trait
pub trait Clock: Send + Sync {
    /// 当前 Unix 时间（毫秒）
    fn now_ms(&self) -> u64;
}

/// 共享时钟句柄
pub type SharedClock = Arc<dyn Clock>;

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }
}

/// 创建系统时钟句柄
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// 手动时钟
///
/// 时间只在调用 `advance` / `set` 时前进，供测试控制窗口边界
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// 创建起始于指定时刻的手动时钟
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    /// 推进时间
    pub fn advance(&self, delta: Duration) {
        let delta_ms = u64::try_from(delta.as_millis()).unwrap_or(u64::MAX);
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// 直接设置当前时刻
    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}
