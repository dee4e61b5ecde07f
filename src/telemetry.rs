//! 日志初始化模块
//!
//! 基于 `tracing-subscriber` 安装全局订阅器，过滤规则优先取 `RUST_LOG`。
//!
//! # 示例
//!
//! ```rust
//! use trafficgate::telemetry::{init_tracing, TelemetryConfig};
//!
//! let config = TelemetryConfig::new("gateway").with_level("trafficgate=debug");
//! let _ = init_tracing(&config);
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// 服务名称
    pub service_name: String,
    /// `RUST_LOG` 未设置时使用的过滤规则
    pub default_level: String,
    /// 输出事件的目标模块
    pub with_target: bool,
    /// 以 JSON 行输出
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "trafficgate".to_string(),
            default_level: "info".to_string(),
            with_target: true,
            json: false,
        }
    }
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// 构造过滤器：`RUST_LOG` 优先，其次默认规则
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.default_level))
    }
}

/// 安装全局订阅器
///
/// 已经安装过订阅器时返回错误，不会覆盖已有订阅器。
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), String> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.with_target);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| format!("初始化日志失败: {}", e))?;

    info!("Tracing initialized for {}", config.service_name);
    Ok(())
}
