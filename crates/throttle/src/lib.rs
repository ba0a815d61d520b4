//! cuba-throttle - 进程内用量计量与限流核心
//!
//! 固定窗口计数器 + TTL 缓存 + 后台清扫任务。
//! 计数器只在单进程内准确：水平扩展部署时各实例独立计数，
//! 有效配额会按实例数放大

pub mod cache;
pub mod limiter;
pub mod meter;
pub mod plan;
pub mod sweep;

pub use cache::TtlCache;
pub use limiter::{Decision, FixedWindowLimiter};
pub use meter::{UsageDecision, UsageMeter};
pub use plan::{PlanLimits, PlanTable, PlanTier};
pub use sweep::{Sweepable, Sweeper};
