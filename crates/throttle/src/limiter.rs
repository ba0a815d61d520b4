//! 固定窗口限流器
//!
//! 经典固定窗口计数：窗口到期后计数归零重来。窗口边界两侧
//! 最多可放行 2x 上限的突发流量，这是该算法的已知取舍，
//! 不是缺陷

use crate::sweep::Sweepable;
use cuba_common::SharedClock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// 窗口计数记录
#[derive(Debug, Clone)]
struct WindowRecord {
    count: u64,
    reset_at_ms: u64,
}

/// 限流检查结果
#[derive(Debug, Clone)]
pub struct Decision {
    /// 是否允许请求
    pub allowed: bool,
    /// 当前窗口内的计数
    pub count: u64,
    /// 剩余配额
    pub remaining: u64,
    /// 配额上限
    pub limit: u64,
    /// 窗口重置时间（Unix 秒）
    pub reset_at: u64,
    /// 建议重试等待时间（秒，仅在拒绝时有效）
    pub retry_after: Option<u64>,
}

impl Decision {
    /// 是否被限流
    pub fn is_limited(&self) -> bool {
        !self.allowed
    }
}

/// 进程内固定窗口限流器
///
/// 检查与递增在同一把锁内完成，同一标识的两次检查不会交错。
/// 计数不持久化：进程重启即清零
pub struct FixedWindowLimiter {
    records: Mutex<HashMap<String, WindowRecord>>,
    clock: SharedClock,
}

impl FixedWindowLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// 检查并消费配额
    ///
    /// - 无记录或窗口已过期：开新窗口，计数 = cost
    /// - 窗口内且 count + cost 超限：拒绝，计数不变
    /// - 否则：计数累加
    pub fn check(&self, key: &str, cost: u64, limit: u64, window: Duration) -> Decision {
        let now = self.clock.now_ms();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let mut records = self.records.lock();
        let active = records.get(key).filter(|r| now < r.reset_at_ms).cloned();

        let decision = match active {
            Some(record) => {
                if record.count.saturating_add(cost) > limit {
                    Self::decision(false, record.count, limit, record.reset_at_ms, now)
                } else {
                    let count = record.count + cost;
                    records.insert(
                        key.to_string(),
                        WindowRecord {
                            count,
                            reset_at_ms: record.reset_at_ms,
                        },
                    );
                    Self::decision(true, count, limit, record.reset_at_ms, now)
                }
            }
            None => {
                let reset_at_ms = now.saturating_add(window_ms);
                if cost > limit {
                    // 单次成本超出整个配额，不开窗口直接拒绝
                    Self::decision(false, 0, limit, reset_at_ms, now)
                } else {
                    records.insert(
                        key.to_string(),
                        WindowRecord {
                            count: cost,
                            reset_at_ms,
                        },
                    );
                    Self::decision(true, cost, limit, reset_at_ms, now)
                }
            }
        };

        debug!(
            key,
            allowed = decision.allowed,
            count = decision.count,
            remaining = decision.remaining,
            "Fixed window rate limit check"
        );

        decision
    }

    /// 只读查看当前窗口状态，不消费配额
    pub fn peek(&self, key: &str, limit: u64, window: Duration) -> Decision {
        let now = self.clock.now_ms();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let records = self.records.lock();
        match records.get(key).filter(|r| now < r.reset_at_ms) {
            Some(record) => Self::decision(
                record.count < limit,
                record.count,
                limit,
                record.reset_at_ms,
                now,
            ),
            None => Self::decision(true, 0, limit, now.saturating_add(window_ms), now),
        }
    }

    /// 归还配额
    ///
    /// 仅在当前窗口仍有效时扣减，饱和于 0
    pub fn release(&self, key: &str, cost: u64) {
        let now = self.clock.now_ms();
        let mut records = self.records.lock();
        if let Some(record) = records.get_mut(key) {
            if now < record.reset_at_ms {
                record.count = record.count.saturating_sub(cost);
            }
        }
    }

    /// 当前跟踪的标识数量（含未被清扫的过期记录）
    pub fn tracked_keys(&self) -> usize {
        self.records.lock().len()
    }

    /// 移除窗口已过期的记录，返回移除数量
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|_, record| now < record.reset_at_ms);
        before - records.len()
    }

    fn decision(allowed: bool, count: u64, limit: u64, reset_at_ms: u64, now_ms: u64) -> Decision {
        let retry_after = if allowed {
            None
        } else {
            Some(reset_at_ms.saturating_sub(now_ms).div_ceil(1000))
        };

        Decision {
            allowed,
            count,
            remaining: limit.saturating_sub(count),
            limit,
            reset_at: reset_at_ms / 1000,
            retry_after,
        }
    }
}

impl Sweepable for FixedWindowLimiter {
    fn name(&self) -> &'static str {
        "window_limiter"
    }

    fn sweep(&self) -> usize {
        self.sweep_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cuba_common::ManualClock;
    use std::sync::Arc;

    const MINUTE: Duration = Duration::from_secs(60);

    fn limiter_with_clock() -> (FixedWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        (FixedWindowLimiter::new(clock.clone()), clock)
    }

    #[test]
    fn test_first_check_allows_and_initializes_count() {
        let (limiter, _) = limiter_with_clock();

        let decision = limiter.check("ip:9.9.9.9", 1, 5, MINUTE);
        assert!(decision.allowed);
        assert_eq!(decision.count, 1);
        assert_eq!(decision.remaining, 4);
        assert_eq!(decision.retry_after, None);
    }

    #[test]
    fn test_denies_at_ceiling_until_reset() {
        let (limiter, clock) = limiter_with_clock();

        for _ in 0..5 {
            assert!(limiter.check("k", 1, 5, MINUTE).allowed);
        }

        let denied = limiter.check("k", 1, 5, MINUTE);
        assert!(denied.is_limited());
        assert_eq!(denied.count, 5);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Some(60));

        // 窗口未到期前持续拒绝
        clock.advance(Duration::from_secs(30));
        let still_denied = limiter.check("k", 1, 5, MINUTE);
        assert!(still_denied.is_limited());
        assert_eq!(still_denied.retry_after, Some(30));
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let (limiter, clock) = limiter_with_clock();

        for _ in 0..5 {
            limiter.check("k", 1, 5, MINUTE);
        }
        assert!(limiter.check("k", 1, 5, MINUTE).is_limited());

        clock.advance(Duration::from_secs(61));
        let fresh = limiter.check("k", 1, 5, MINUTE);
        assert!(fresh.allowed);
        assert_eq!(fresh.count, 1);
    }

    #[test]
    fn test_boundary_scenario_with_stable_reset_time() {
        // 上限 3：请求 1-3 放行，第 4 个拒绝且 reset 与首请求建立的窗口一致
        let (limiter, clock) = limiter_with_clock();

        let first = limiter.check("ip:1.2.3.4", 1, 3, MINUTE);
        assert!(first.allowed);
        let window_reset = first.reset_at;

        assert!(limiter.check("ip:1.2.3.4", 1, 3, MINUTE).allowed);
        assert!(limiter.check("ip:1.2.3.4", 1, 3, MINUTE).allowed);

        let fourth = limiter.check("ip:1.2.3.4", 1, 3, MINUTE);
        assert!(fourth.is_limited());
        assert_eq!(fourth.reset_at, window_reset);

        clock.advance(Duration::from_secs(61));
        let fifth = limiter.check("ip:1.2.3.4", 1, 3, MINUTE);
        assert!(fifth.allowed);
        assert_eq!(fifth.count, 1);
    }

    #[test]
    fn test_window_boundary_admits_a_fresh_burst() {
        // 固定窗口的边界行为：跨过窗口边界后整个配额重新可用，
        // 两个窗口相邻处最多放行 2x 上限
        let (limiter, clock) = limiter_with_clock();

        for _ in 0..3 {
            assert!(limiter.check("k", 1, 3, MINUTE).allowed);
        }

        clock.advance(Duration::from_secs(60));
        for _ in 0..3 {
            assert!(limiter.check("k", 1, 3, MINUTE).allowed);
        }
        assert!(limiter.check("k", 1, 3, MINUTE).is_limited());
    }

    #[test]
    fn test_cost_accounting() {
        let (limiter, _) = limiter_with_clock();

        let first = limiter.check("tok:u1", 400, 1_000, MINUTE);
        assert!(first.allowed);
        assert_eq!(first.remaining, 600);

        // 会把计数推过上限的成本被整体拒绝，计数不变
        let too_big = limiter.check("tok:u1", 700, 1_000, MINUTE);
        assert!(too_big.is_limited());
        assert_eq!(too_big.count, 400);

        assert!(limiter.check("tok:u1", 600, 1_000, MINUTE).allowed);
    }

    #[test]
    fn test_oversized_cost_denied_without_opening_window() {
        let (limiter, _) = limiter_with_clock();

        let decision = limiter.check("tok:u1", 2_000, 1_000, MINUTE);
        assert!(decision.is_limited());
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_release_returns_quota() {
        let (limiter, _) = limiter_with_clock();

        for _ in 0..3 {
            limiter.check("k", 1, 3, MINUTE);
        }
        assert!(limiter.check("k", 1, 3, MINUTE).is_limited());

        limiter.release("k", 1);
        let decision = limiter.check("k", 1, 3, MINUTE);
        assert!(decision.allowed);
        assert_eq!(decision.count, 3);
    }

    #[test]
    fn test_release_saturates_at_zero() {
        let (limiter, _) = limiter_with_clock();
        limiter.check("k", 1, 3, MINUTE);

        limiter.release("k", 10);
        let peeked = limiter.peek("k", 3, MINUTE);
        assert_eq!(peeked.count, 0);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let (limiter, _) = limiter_with_clock();

        for _ in 0..5 {
            let peeked = limiter.peek("k", 3, MINUTE);
            assert!(peeked.allowed);
            assert_eq!(peeked.count, 0);
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_sweep_drops_expired_windows() {
        let (limiter, clock) = limiter_with_clock();

        limiter.check("short", 1, 5, Duration::from_secs(1));
        limiter.check("long", 1, 5, MINUTE);
        assert_eq!(limiter.tracked_keys(), 2);

        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.sweep_expired(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_keys_are_isolated() {
        let (limiter, _) = limiter_with_clock();

        for _ in 0..3 {
            assert!(limiter.check("ip:1.1.1.1", 1, 3, MINUTE).allowed);
        }
        assert!(limiter.check("ip:1.1.1.1", 1, 3, MINUTE).is_limited());

        // 另一个标识不受影响
        assert!(limiter.check("ip:2.2.2.2", 1, 3, MINUTE).allowed);
    }
}
