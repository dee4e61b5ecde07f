//! 配置同步模块
//!
//! 以订阅为单位从远端拉取治理数据（服务策略等），版本只在确认更新后前进。

pub mod http;

pub use http::{HttpFetcher, HttpResponse, HttpSubscription, HttpWatcher, Watchable};
#[cfg(feature = "http")]
pub use http::ReqwestFetcher;

use crate::error::GovernanceError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// 订阅键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SyncKey {
    /// 数据类型，如 `policy`
    pub kind: String,
    /// 资源名，如服务名
    pub name: String,
}

impl SyncKey {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// 拉取结果状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Success,
    NotModified,
    NotFound,
    Error,
}

/// 一次拉取的结果
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResponse<T> {
    pub status: SyncStatus,
    pub data: Option<T>,
    /// 服务端报告的版本
    pub version: Option<u64>,
    pub error: Option<String>,
}

impl<T> SyncResponse<T> {
    pub fn success(data: T, version: Option<u64>) -> Self {
        Self {
            status: SyncStatus::Success,
            data: Some(data),
            version,
            error: None,
        }
    }

    pub fn not_modified() -> Self {
        Self {
            status: SyncStatus::NotModified,
            data: None,
            version: None,
            error: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: SyncStatus::NotFound,
            data: None,
            version: None,
            error: Some("not found".to_string()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: SyncStatus::Error,
            data: None,
            version: None,
            error: Some(message.into()),
        }
    }
}

/// 同步事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncEventKind {
    Update,
    Delete,
    Error,
}

/// 同步事件
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent<T> {
    pub key: SyncKey,
    pub kind: SyncEventKind,
    pub data: Option<T>,
    /// 事件发出时订阅的版本
    pub version: u64,
    pub error: Option<String>,
}

/// 同步事件监听器
pub type SyncListener<T> = Arc<dyn Fn(SyncEvent<T>) + Send + Sync>;

/// 服务端响应包装
///
/// ```json
/// {"code": 200, "version": 3, "data": {...}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default = "default_code")]
    pub code: u16,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub version: Option<u64>,
    pub data: Option<T>,
}

fn default_code() -> u16 {
    200
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, version: u64) -> Self {
        Self {
            code: 200,
            message: None,
            version: Some(version),
            data: Some(data),
        }
    }

    /// 按业务码转换为拉取结果
    pub fn into_sync_response(self) -> SyncResponse<T> {
        match (self.code, self.data) {
            (200, Some(data)) => SyncResponse::success(data, self.version),
            (200, None) => SyncResponse::error("response without data"),
            (304, _) => SyncResponse::not_modified(),
            (404, _) => SyncResponse::not_found(),
            (code, _) => SyncResponse::error(
                self.message
                    .unwrap_or_else(|| format!("unexpected response code {}", code)),
            ),
        }
    }
}

/// 响应体解析器
pub trait ObjectParser: Send + Sync + 'static {
    fn parse<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, GovernanceError>;
}

/// JSON 解析器
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

impl ObjectParser for JsonParser {
    fn parse<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, GovernanceError> {
        Ok(serde_json::from_slice(body)?)
    }
}
