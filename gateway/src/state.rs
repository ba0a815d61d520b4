//! 网关共享状态

use cuba_common::SharedClock;
use cuba_config::LimitsConfig;
use cuba_telemetry::MetricsRecorder;
use cuba_throttle::{FixedWindowLimiter, PlanTier, Sweepable, Sweeper, TtlCache, UsageMeter};
use std::sync::Arc;

/// 网关共享状态
#[derive(Clone)]
pub struct AppState {
    /// IP / 用户窗口计数器（按用途前缀共用一个实例）
    pub limiter: Arc<FixedWindowLimiter>,
    /// 按计划计量的用量
    pub meter: Arc<UsageMeter>,
    /// 用户 -> 计划档位解析缓存
    pub plan_cache: Arc<TtlCache<PlanTier>>,
    /// 限流配置
    pub limits: Arc<LimitsConfig>,
    /// Prometheus 渲染句柄
    pub metrics: Arc<MetricsRecorder>,
    /// 清扫任务
    pub sweeper: Arc<Sweeper>,
}

impl AppState {
    /// 由配置构建全部限流组件并启动清扫任务
    ///
    /// 组件在这里显式组装成进程级单例，而不是藏在模块加载副作用里
    pub fn build(limits: LimitsConfig, metrics: Arc<MetricsRecorder>, clock: SharedClock) -> Self {
        let limiter = Arc::new(FixedWindowLimiter::new(clock.clone()));
        let plans = limits.plans.clone().merged_with_defaults();
        let meter = Arc::new(UsageMeter::new(plans, clock.clone()));
        let plan_cache: Arc<TtlCache<PlanTier>> = Arc::new(TtlCache::new(clock));

        let targets: Vec<Arc<dyn Sweepable>> =
            vec![limiter.clone(), meter.clone(), plan_cache.clone()];
        let sweeper = Arc::new(Sweeper::spawn(targets, limits.sweep_interval()));

        Self {
            limiter,
            meter,
            plan_cache,
            limits: Arc::new(limits),
            metrics,
            sweeper,
        }
    }
}
