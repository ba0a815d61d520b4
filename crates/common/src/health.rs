//! 健康状态聚合
//!
//! 供 HTTP /health 端点序列化输出

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 组件健康状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// 组件名称
    pub name: String,
    /// 是否健康
    pub healthy: bool,
    /// 附加信息
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// 聚合健康结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// 整体是否健康
    pub healthy: bool,
    /// 检查时刻
    pub checked_at: DateTime<Utc>,
    /// 各组件状态
    pub components: Vec<ComponentHealth>,
}

impl HealthReport {
    pub fn new() -> Self {
        Self {
            healthy: true,
            checked_at: Utc::now(),
            components: Vec::new(),
        }
    }

    /// 添加组件状态
    pub fn add_component(
        &mut self,
        name: impl Into<String>,
        healthy: bool,
        detail: Option<String>,
    ) {
        if !healthy {
            self.healthy = false;
        }
        self.components.push(ComponentHealth {
            name: name.into(),
            healthy,
            detail,
        });
    }

    /// 健康组件数量
    pub fn healthy_count(&self) -> usize {
        self.components.iter().filter(|c| c.healthy).count()
    }
}

impl Default for HealthReport {
    fn default() -> Self {
        Self::new()
    }
}
