//! 订阅计划配额表
//!
//! 静态的计划 -> 配额映射，进程启动时由配置固化，运行期不再变更

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// 订阅计划等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Basic,
    Plus,
    Pro,
}

impl PlanTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Plus => "plus",
            Self::Pro => "pro",
        }
    }

    /// 解析计划名（大小写不敏感）
    ///
    /// 未识别的计划降级为 Free，不报错
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Self::Free,
            "basic" => Self::Basic,
            "plus" => Self::Plus,
            "pro" => Self::Pro,
            other => {
                debug!(plan = other, "Unknown plan tier, falling back to free");
                Self::Free
            }
        }
    }
}

/// 单个计划的配额规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLimits {
    /// 窗口内最大请求数
    pub requests: u64,
    /// 请求窗口（秒）
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// 每分钟 token 预算
    pub tokens_per_minute: u64,
}

fn default_window_secs() -> u64 {
    60
}

impl PlanLimits {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// 计划配额表
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanTable {
    plans: HashMap<PlanTier, PlanLimits>,
}

impl Default for PlanTable {
    fn default() -> Self {
        let mut plans = HashMap::new();
        plans.insert(
            PlanTier::Free,
            PlanLimits {
                requests: 10,
                window_secs: 60,
                tokens_per_minute: 10_000,
            },
        );
        plans.insert(
            PlanTier::Basic,
            PlanLimits {
                requests: 60,
                window_secs: 60,
                tokens_per_minute: 60_000,
            },
        );
        plans.insert(
            PlanTier::Plus,
            PlanLimits {
                requests: 120,
                window_secs: 60,
                tokens_per_minute: 120_000,
            },
        );
        plans.insert(
            PlanTier::Pro,
            PlanLimits {
                requests: 200,
                window_secs: 60,
                tokens_per_minute: 300_000,
            },
        );
        Self { plans }
    }
}

impl PlanTable {
    /// 查询计划配额
    ///
    /// 配置里缺失的档位回退到 Free；Free 也缺失时使用内置默认
    pub fn limits(&self, tier: PlanTier) -> PlanLimits {
        if let Some(limits) = self.plans.get(&tier) {
            return limits.clone();
        }

        self.plans
            .get(&PlanTier::Free)
            .cloned()
            .unwrap_or_else(|| {
                Self::default()
                    .plans
                    .remove(&PlanTier::Free)
                    .expect("built-in table always contains free")
            })
    }

    /// 用内置默认补齐配置中缺失的档位
    pub fn merged_with_defaults(mut self) -> Self {
        for (tier, limits) in Self::default().plans {
            self.plans.entry(tier).or_insert(limits);
        }
        self
    }

    /// 已配置的档位数量
    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}
