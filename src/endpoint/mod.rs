//! 端点模块
//!
//! 描述一个可路由的后端实例，以及按单元（unit）和分区（cell）组织的端点索引。
//!
//! # 能力划分
//!
//! - [`Locatable`]: 主机、端口和派生地址
//! - [`Stateful`]: 健康状态
//! - [`Weighted`]: 基础权重和预热
//! - [`Labeled`]: 任意字符串标签，缺失时返回空字符串

mod group;
mod reweight;
mod state;

pub use group::{CellGroup, EndpointGroup, UnitGroup};
pub use reweight::Reweight;
pub use state::EndpointState;

use crate::constants::{
    DEFAULT_WEIGHT, LABEL_CELL, LABEL_LANE, LABEL_LIVE_SPACE_ID, LABEL_REGION, LABEL_UNIT,
    LABEL_ZONE,
};
use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

// ============================================================================
// 能力 trait
// ============================================================================

/// 可定位
pub trait Locatable {
    fn host(&self) -> &str;

    fn port(&self) -> u16;

    /// `host:port`，由主机和端口唯一决定
    fn address(&self) -> &str;

    /// 端点ID，等同于地址
    fn id(&self) -> &str {
        self.address()
    }
}

/// 有状态
pub trait Stateful {
    fn state(&self) -> EndpointState;

    fn is_accessible(&self) -> bool {
        self.state().is_accessible()
    }
}

/// 带权重
pub trait Weighted {
    /// 基础权重
    fn weight(&self) -> u32;

    /// 预热时长（毫秒），0 表示不预热
    fn warmup(&self) -> i64;

    /// 预热开始时间（毫秒）
    fn timestamp(&self) -> i64;

    /// 计算有效权重（含预热和外部系数）
    fn effective_weight(&self, ratio: Option<f64>, now: i64) -> u32;
}

/// 带标签
pub trait Labeled {
    /// 获取标签，缺失时返回空字符串
    fn label(&self, key: &str) -> &str;

    fn unit(&self) -> &str {
        self.label(LABEL_UNIT)
    }

    fn cell(&self) -> &str {
        self.label(LABEL_CELL)
    }

    fn region(&self) -> &str {
        self.label(LABEL_REGION)
    }

    fn zone(&self) -> &str {
        self.label(LABEL_ZONE)
    }

    fn lane(&self) -> &str {
        self.label(LABEL_LANE)
    }

    fn live_space_id(&self) -> &str {
        self.label(LABEL_LIVE_SPACE_ID)
    }
}

/// 端点
pub trait Endpoint: Locatable + Stateful + Weighted + Labeled + Debug + Send + Sync {}

impl<T> Endpoint for T where T: Locatable + Stateful + Weighted + Labeled + Debug + Send + Sync {}

/// 线程安全的端点引用
pub type SharedEndpoint = Arc<dyn Endpoint>;

// ============================================================================
// 服务实例（注册中心传输格式）
// ============================================================================

/// 服务实例
///
/// 注册中心中保存和传输的实例描述。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// 预热时长（毫秒）
    #[serde(default)]
    pub warmup_ms: i64,
    /// 预热开始时间（毫秒时间戳）
    #[serde(default)]
    pub timestamp_ms: i64,
    #[serde(default)]
    pub state: EndpointState,
}

fn default_weight() -> u32 {
    DEFAULT_WEIGHT
}

impl ServiceInstance {
    /// 创建服务实例
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            labels: Default::default(),
            weight: DEFAULT_WEIGHT,
            warmup_ms: 0,
            timestamp_ms: 0,
            state: EndpointState::Healthy,
        }
    }

    /// 添加标签
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// 设置预热
    ///
    /// # 参数
    /// - `timestamp_ms`: 预热开始时间
    /// - `warmup_ms`: 预热时长
    pub fn with_warmup(mut self, timestamp_ms: i64, warmup_ms: i64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self.warmup_ms = warmup_ms;
        self
    }

    pub fn with_state(mut self, state: EndpointState) -> Self {
        self.state = state;
        self
    }

    /// 实例地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// 服务端点
// ============================================================================

/// 服务端点
///
/// 从 [`ServiceInstance`] 一次性构建，标签在构建时确定，状态可原子更新。
pub struct ServiceEndpoint {
    host: String,
    port: u16,
    address: String,
    labels: HashMap<String, String>,
    state: AtomicU8,
    weight: u32,
    timestamp: i64,
    warmup: i64,
    reweight: OnceLock<Reweight>,
}

impl ServiceEndpoint {
    /// 创建服务端点
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::from_instance(&ServiceInstance::new(host, port))
    }

    /// 从服务实例构建
    pub fn from_instance(instance: &ServiceInstance) -> Self {
        Self {
            host: instance.host.clone(),
            port: instance.port,
            address: instance.address(),
            labels: instance
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            state: AtomicU8::new(instance.state.as_u8()),
            weight: instance.weight,
            timestamp: instance.timestamp_ms,
            warmup: instance.warmup_ms,
            reweight: OnceLock::new(),
        }
    }

    /// 更新状态
    pub fn set_state(&self, state: EndpointState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    fn reweight(&self) -> &Reweight {
        self.reweight
            .get_or_init(|| Reweight::new(self.weight, self.timestamp, self.warmup))
    }
}

impl Debug for ServiceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceEndpoint")
            .field("address", &self.address)
            .field("state", &self.state())
            .field("weight", &self.weight)
            .field("labels", &self.labels)
            .finish()
    }
}

impl Locatable for ServiceEndpoint {
    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn address(&self) -> &str {
        &self.address
    }
}

impl Stateful for ServiceEndpoint {
    fn state(&self) -> EndpointState {
        EndpointState::from_u8(self.state.load(Ordering::Acquire))
    }
}

impl Weighted for ServiceEndpoint {
    fn weight(&self) -> u32 {
        self.weight
    }

    fn warmup(&self) -> i64 {
        self.warmup
    }

    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn effective_weight(&self, ratio: Option<f64>, now: i64) -> u32 {
        self.reweight().get_weight(ratio, now)
    }
}

impl Labeled for ServiceEndpoint {
    fn label(&self, key: &str) -> &str {
        self.labels.get(key).map(String::as_str).unwrap_or("")
    }
}
