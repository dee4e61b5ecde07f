//! 配置模块
//!
//! 定义流量治理的配置结构，支持从 YAML/TOML/JSON 文件加载。

use crate::constants::{
    DEFAULT_WATCH_INTERVAL_MS, DEFAULT_WATCH_JITTER_MS, DEFAULT_WATCH_TIMEOUT_MS,
    LIMITER_TYPE_LOCAL,
};
use crate::error::GovernanceError;
use crate::policy::ServicePolicy;
use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// 流量治理配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceConfig {
    pub version: String,
    #[serde(default)]
    pub live: LiveConfig,
    #[serde(default)]
    pub limiter: LimiterSettings,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub services: Vec<ServicePolicy>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            live: LiveConfig::default(),
            limiter: LimiterSettings::default(),
            watcher: WatcherConfig::default(),
            services: Vec::new(),
        }
    }
}

impl GovernanceConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.version.is_empty() {
            return Err("版本号不能为空".to_string());
        }

        self.limiter.validate()?;
        self.watcher.validate()?;

        let mut services = HashSet::new();
        for (index, service) in self.services.iter().enumerate() {
            if !services.insert(&service.service) {
                return Err(format!("服务策略重复: {}", service.service));
            }
            service
                .validate()
                .map_err(|e| format!("服务策略[{}]校验失败: {}", index, e))?;
        }

        Ok(())
    }

    /// 查找服务策略
    pub fn service_policy(&self, service: &str) -> Option<&ServicePolicy> {
        self.services.iter().find(|s| s.service == service)
    }

    /// 从文件加载配置，按扩展名选择格式
    pub fn load_from_file(path: &Path) -> Result<Self, GovernanceError> {
        let content = std::fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| GovernanceError::ConfigError("无法确定配置文件类型".to_string()))?;

        let config: GovernanceConfig = match extension {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(GovernanceError::ConfigError(format!(
                    "不支持的配置文件类型: {}",
                    extension
                )))
            }
        };

        config.validate().map_err(GovernanceError::ConfigError)?;
        info!(
            "Loaded governance config version {} from {:?}",
            config.version, path
        );
        Ok(config)
    }
}

/// 多活配置
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveConfig {
    /// 多活空间
    #[serde(default)]
    pub live_space_id: String,
    /// 本地单元
    #[serde(default)]
    pub local_unit: String,
    /// 本地分区
    #[serde(default)]
    pub local_cell: String,
    /// 本地泳道
    #[serde(default)]
    pub local_lane: String,
    /// 是否允许访问非本单元的请求进入（单元故障切换）
    #[serde(default)]
    pub unit_failover: bool,
}

/// 限流器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterSettings {
    /// 默认限流器实现类型
    pub default_type: String,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            default_type: LIMITER_TYPE_LOCAL.to_string(),
        }
    }
}

impl LimiterSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.default_type.is_empty() {
            return Err("默认限流器类型不能为空".to_string());
        }
        Ok(())
    }
}

/// HTTP 监视器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// 拉取地址模板，支持 `{space_id}`、`{space_version}` 占位符
    #[serde(default)]
    pub url: String,
    /// 轮询间隔（毫秒）
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// 随机抖动上限（毫秒）
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    /// 请求超时（毫秒）
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// 额外请求头
    #[serde(default)]
    pub headers: std::collections::BTreeMap<String, String>,
}

fn default_interval_ms() -> u64 {
    DEFAULT_WATCH_INTERVAL_MS
}

fn default_jitter_ms() -> u64 {
    DEFAULT_WATCH_JITTER_MS
}

fn default_timeout_ms() -> u64 {
    DEFAULT_WATCH_TIMEOUT_MS
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            interval_ms: DEFAULT_WATCH_INTERVAL_MS,
            jitter_ms: DEFAULT_WATCH_JITTER_MS,
            timeout_ms: DEFAULT_WATCH_TIMEOUT_MS,
            headers: Default::default(),
        }
    }
}

impl WatcherConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("轮询间隔必须大于0".to_string());
        }
        if self.timeout_ms == 0 {
            return Err("请求超时必须大于0".to_string());
        }
        Ok(())
    }
}
