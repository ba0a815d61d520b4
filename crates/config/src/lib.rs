//! cuba-config - 配置加载库

use std::time::Duration;

use cuba_throttle::PlanTable;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 输出 JSON 行日志（生产环境）
    #[serde(default)]
    pub json_logs: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}

/// 限流配置
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// 是否启用限流
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 匿名调用每日配额（按 IP）
    #[serde(default = "default_anonymous_daily")]
    pub anonymous_daily: u64,
    /// 单 IP 每分钟配额
    #[serde(default = "default_ip_per_minute")]
    pub ip_per_minute: u64,
    /// 单用户每分钟配额
    #[serde(default = "default_user_per_minute")]
    pub user_per_minute: u64,
    /// 清扫间隔（秒）
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// 计划资费表（缺失档位回退到内置默认）
    #[serde(default)]
    pub plans: PlanTable,
}

fn default_enabled() -> bool {
    true
}

fn default_anonymous_daily() -> u64 {
    3
}

fn default_ip_per_minute() -> u64 {
    20
}

fn default_user_per_minute() -> u64 {
    60
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl LimitsConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            anonymous_daily: default_anonymous_daily(),
            ip_per_minute: default_ip_per_minute(),
            user_per_minute: default_user_per_minute(),
            sweep_interval_secs: default_sweep_interval_secs(),
            plans: PlanTable::default(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    pub app_env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config: Self = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("").split("_"))
            .extract()?;

        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
