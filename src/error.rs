//! Copyright (c) 2026, Kirky.X
//!
//! Apache License 2.0
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。预期内的结果（拒绝、未找到）不走错误通道，
//! 而是通过 [`Permission`] 这类结果类型返回。

use thiserror::Error;

/// 流量治理错误类型
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 注册中心错误
    #[error("注册中心错误: {0}")]
    RegistryError(#[from] RegistryError),

    /// 同步错误
    #[error("同步错误: {0}")]
    SyncError(String),

    /// 限流错误
    #[error("限流错误: {0}")]
    LimitError(String),

    /// 路由错误
    #[error("路由错误: {0}")]
    RouteError(String),

    /// HTTP错误
    #[error("HTTP错误: {0}")]
    HttpError(String),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML解析错误
    #[error("TOML解析错误: {0}")]
    TomlError(#[from] toml::de::Error),

    /// 其他错误
    #[error("未知错误: {0}")]
    Other(String),
}

/// 注册中心错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    /// 连接错误
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 节点已存在
    #[error("节点已存在: {0}")]
    NodeExists(String),

    /// 未找到
    #[error("未找到: {0}")]
    NotFound(String),

    /// 编解码错误
    #[error("编解码错误: {0}")]
    CodecError(String),
}

/// 准入结果
///
/// 限流、鉴权等准入检查的结论。拒绝是一等结果，不是错误。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    /// 允许
    Success,
    /// 拒绝，携带原因
    Failure(String),
}

impl Permission {
    /// 允许
    pub fn success() -> Self {
        Permission::Success
    }

    /// 拒绝
    pub fn failure(reason: impl Into<String>) -> Self {
        Permission::Failure(reason.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Permission::Success)
    }

    /// 拒绝原因，允许时为 `None`
    pub fn message(&self) -> Option<&str> {
        match self {
            Permission::Success => None,
            Permission::Failure(reason) => Some(reason),
        }
    }
}
