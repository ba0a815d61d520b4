//! 按计划计量的用量限制
//!
//! 每个用户两个计数器：请求数与预估 token 数，任一超限即拒绝。
//! token 成本是调用方的预估值，不做事后校正

use crate::limiter::{Decision, FixedWindowLimiter};
use crate::plan::{PlanTable, PlanTier};
use crate::sweep::Sweepable;
use cuba_common::SharedClock;
use std::time::Duration;
use tracing::debug;

/// token 预算固定按分钟窗口计
const TOKEN_WINDOW: Duration = Duration::from_secs(60);

/// 用量检查结果
#[derive(Debug, Clone)]
pub struct UsageDecision {
    /// 是否允许本次调用
    pub allowed: bool,
    /// 生效的计划档位
    pub tier: PlanTier,
    /// 请求计数器结果
    pub requests: Decision,
    /// token 计数器结果
    pub tokens: Decision,
}

impl UsageDecision {
    /// 拒绝时建议的重试等待（秒），取两个计数器中较大者
    pub fn retry_after(&self) -> Option<u64> {
        match (self.requests.retry_after, self.tokens.retry_after) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// 用量计量器
pub struct UsageMeter {
    requests: FixedWindowLimiter,
    tokens: FixedWindowLimiter,
    plans: PlanTable,
}

impl UsageMeter {
    pub fn new(plans: PlanTable, clock: SharedClock) -> Self {
        Self {
            requests: FixedWindowLimiter::new(clock.clone()),
            tokens: FixedWindowLimiter::new(clock),
            plans,
        }
    }

    /// 检查并记录一次调用
    ///
    /// 未识别的计划名按 Free 处理
    pub fn check(&self, user: &str, plan: &str, estimated_tokens: u64) -> UsageDecision {
        self.check_tier(user, PlanTier::parse(plan), estimated_tokens)
    }

    /// 检查并记录一次调用（已解析档位）
    pub fn check_tier(&self, user: &str, tier: PlanTier, estimated_tokens: u64) -> UsageDecision {
        let limits = self.plans.limits(tier);
        let req_key = format!("req:{user}");
        let tok_key = format!("tok:{user}");

        let requests = self
            .requests
            .check(&req_key, 1, limits.requests, limits.window());
        if !requests.allowed {
            // 请求数已超限，token 计数器只读不记账
            let tokens = self
                .tokens
                .peek(&tok_key, limits.tokens_per_minute, TOKEN_WINDOW);
            debug!(user, tier = tier.as_str(), "Usage denied by request ceiling");
            return UsageDecision {
                allowed: false,
                tier,
                requests,
                tokens,
            };
        }

        let tokens = self.tokens.check(
            &tok_key,
            estimated_tokens,
            limits.tokens_per_minute,
            TOKEN_WINDOW,
        );
        if !tokens.allowed {
            // token 预算拒绝的调用不应消耗请求配额，归还名额
            self.requests.release(&req_key, 1);
            let requests = self.requests.peek(&req_key, limits.requests, limits.window());
            debug!(
                user,
                tier = tier.as_str(),
                estimated_tokens,
                "Usage denied by token budget"
            );
            return UsageDecision {
                allowed: false,
                tier,
                requests,
                tokens,
            };
        }

        UsageDecision {
            allowed: true,
            tier,
            requests,
            tokens,
        }
    }

    /// 当前跟踪的计数器数量
    pub fn tracked_keys(&self) -> usize {
        self.requests.tracked_keys() + self.tokens.tracked_keys()
    }

    /// 移除过期窗口记录，返回移除数量
    pub fn sweep_expired(&self) -> usize {
        self.requests.sweep_expired() + self.tokens.sweep_expired()
    }
}

impl Sweepable for UsageMeter {
    fn name(&self) -> &'static str {
        "usage_meter"
    }

    fn sweep(&self) -> usize {
        self.sweep_expired()
    }
}
