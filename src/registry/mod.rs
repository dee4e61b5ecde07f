//! Copyright (c) 2026, Kirky.X
//!
//! Apache License 2.0
//!
//! 注册中心模块
//!
//! 定义注册中心端口以及把注册事件转换为端点分组的服务视图。
//!
//! # 实现
//!
//! - [`MemoryRegistry`]: 进程内注册中心
//! - [`WatchRegistry`]: 基于持久监听的推送式注册中心（Zookeeper 风格），
//!   连接恢复后通过版本化重试任务重新注册和订阅

mod memory;
mod retry;
mod watch;

pub use memory::MemoryRegistry;
pub use retry::{RetryOutcome, VersionedRetry};
pub use watch::{
    ConnectionListener, ConnectionState, NodeData, NodeListener, WatchClient, WatchRegistry,
    WatchRegistryConfig,
};

use crate::endpoint::{EndpointGroup, ServiceEndpoint, ServiceInstance, SharedEndpoint};
use crate::error::RegistryError;
use arc_swap::ArcSwap;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 默认命名空间
pub const DEFAULT_NAMESPACE: &str = "default";

/// 默认分组
pub const DEFAULT_GROUP: &str = "default";

// ============================================================================
// 服务标识
// ============================================================================

/// 服务标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId {
    pub namespace: String,
    pub group: String,
    pub service: String,
}

impl ServiceId {
    /// 默认命名空间和分组下的服务
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            group: DEFAULT_GROUP.to_string(),
            service: service.into(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.group, self.service)
    }
}

// ============================================================================
// 注册事件
// ============================================================================

/// 注册事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistryEventKind {
    /// 全量快照
    Full,
    /// 实例上线
    Add,
    /// 实例下线
    Remove,
    /// 实例变更
    Update,
}

/// 注册事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub service: ServiceId,
    pub kind: RegistryEventKind,
    pub instances: Vec<ServiceInstance>,
    /// 注册中心侧版本
    pub version: u64,
    /// 事件时间（毫秒）
    pub timestamp: i64,
}

impl RegistryEvent {
    pub fn new(
        service: ServiceId,
        kind: RegistryEventKind,
        instances: Vec<ServiceInstance>,
        version: u64,
    ) -> Self {
        Self {
            service,
            kind,
            instances,
            version,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 全量快照
    pub fn full(service: ServiceId, instances: Vec<ServiceInstance>, version: u64) -> Self {
        Self::new(service, RegistryEventKind::Full, instances, version)
    }

    pub fn add(service: ServiceId, instances: Vec<ServiceInstance>, version: u64) -> Self {
        Self::new(service, RegistryEventKind::Add, instances, version)
    }

    pub fn remove(service: ServiceId, instances: Vec<ServiceInstance>, version: u64) -> Self {
        Self::new(service, RegistryEventKind::Remove, instances, version)
    }

    pub fn update(service: ServiceId, instances: Vec<ServiceInstance>, version: u64) -> Self {
        Self::new(service, RegistryEventKind::Update, instances, version)
    }
}

/// 注册事件回调
pub type RegistryCallback = Arc<dyn Fn(RegistryEvent) + Send + Sync>;

// ============================================================================
// 注册中心端口
// ============================================================================

/// 注册中心
#[async_trait]
pub trait Registry: Send + Sync {
    /// 注册中心名称
    fn name(&self) -> &str;

    /// 注册实例
    async fn register(
        &self,
        service: &ServiceId,
        instance: ServiceInstance,
    ) -> Result<(), RegistryError>;

    /// 注销实例
    async fn unregister(
        &self,
        service: &ServiceId,
        instance: &ServiceInstance,
    ) -> Result<(), RegistryError>;

    /// 订阅服务，订阅成功后先收到一次全量事件
    async fn subscribe(
        &self,
        service: &ServiceId,
        callback: RegistryCallback,
    ) -> Result<(), RegistryError>;

    /// 取消订阅
    async fn unsubscribe(&self, service: &ServiceId) -> Result<(), RegistryError>;
}

// ============================================================================
// 服务端点视图
// ============================================================================

/// 服务端点视图
///
/// 按注册事件维护实例表，每次变化后整体重建 [`EndpointGroup`] 并原子替换。
/// 读者总是看到完整构建的分组，但不应跨更新缓存分组引用。
pub struct ServiceEndpoints {
    service: ServiceId,
    /// 地址 -> (实例, 端点)，实例未变化时复用端点以保留其运行时状态
    instances: Mutex<BTreeMap<String, (ServiceInstance, SharedEndpoint)>>,
    group: ArcSwap<EndpointGroup>,
    version: AtomicU64,
}

impl ServiceEndpoints {
    pub fn new(service: ServiceId) -> Self {
        Self {
            service,
            instances: Mutex::new(BTreeMap::new()),
            group: ArcSwap::from_pointee(EndpointGroup::default()),
            version: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &ServiceId {
        &self.service
    }

    /// 当前分组快照
    pub fn group(&self) -> Arc<EndpointGroup> {
        self.group.load_full()
    }

    /// 最近一次事件的版本
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// 应用注册事件
    pub fn apply(&self, event: &RegistryEvent) {
        if event.service != self.service {
            return;
        }

        let mut instances = self.instances.lock();
        match event.kind {
            RegistryEventKind::Full => {
                let mut previous = std::mem::take(&mut *instances);
                for instance in &event.instances {
                    let address = instance.address();
                    let entry = match previous.remove(&address) {
                        Some(entry) if entry.0 == *instance => entry,
                        _ => Self::entry(instance),
                    };
                    instances.insert(address, entry);
                }
            }
            RegistryEventKind::Add | RegistryEventKind::Update => {
                for instance in &event.instances {
                    let address = instance.address();
                    let unchanged = instances
                        .get(&address)
                        .map_or(false, |(existing, _)| existing == instance);
                    if !unchanged {
                        instances.insert(address, Self::entry(instance));
                    }
                }
            }
            RegistryEventKind::Remove => {
                for instance in &event.instances {
                    instances.remove(&instance.address());
                }
            }
        }

        let endpoints: Vec<SharedEndpoint> =
            instances.values().map(|(_, endpoint)| endpoint.clone()).collect();
        self.group.store(Arc::new(EndpointGroup::new(endpoints)));
        self.version.store(event.version, Ordering::Release);
        debug!(
            "Applied {:?} event v{} to {}, {} endpoints",
            event.kind,
            event.version,
            self.service,
            instances.len()
        );
    }

    /// 生成订阅回调
    pub fn callback(self: &Arc<Self>) -> RegistryCallback {
        let endpoints = Arc::clone(self);
        Arc::new(move |event: RegistryEvent| endpoints.apply(&event))
    }

    fn entry(instance: &ServiceInstance) -> (ServiceInstance, SharedEndpoint) {
        let endpoint: SharedEndpoint = Arc::new(ServiceEndpoint::from_instance(instance));
        (instance.clone(), endpoint)
    }
}

impl fmt::Debug for ServiceEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEndpoints")
            .field("service", &self.service)
            .field("version", &self.version())
            .field("endpoints", &self.group.load().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Locatable;

    fn instance(host: &str) -> ServiceInstance {
        ServiceInstance::new(host, 8080).with_label("unit", "u1")
    }

    fn addresses(endpoints: &ServiceEndpoints) -> Vec<String> {
        endpoints
            .group()
            .endpoints()
            .iter()
            .map(|e| e.address().to_string())
            .collect()
    }

    #[test]
    fn test_service_id_display() {
        let id = ServiceId::new("orders").with_namespace("prod").with_group("blue");
        assert_eq!(id.to_string(), "prod/blue/orders");
        assert_eq!(ServiceId::new("orders").to_string(), "default/default/orders");
    }

    #[test]
    fn test_apply_full_then_delta() {
        let service = ServiceId::new("orders");
        let endpoints = ServiceEndpoints::new(service.clone());

        endpoints.apply(&RegistryEvent::full(
            service.clone(),
            vec![instance("10.0.0.1"), instance("10.0.0.2")],
            1,
        ));
        assert_eq!(addresses(&endpoints), vec!["10.0.0.1:8080", "10.0.0.2:8080"]);

        endpoints.apply(&RegistryEvent::add(service.clone(), vec![instance("10.0.0.3")], 2));
        endpoints.apply(&RegistryEvent::remove(service.clone(), vec![instance("10.0.0.1")], 3));
        assert_eq!(addresses(&endpoints), vec!["10.0.0.2:8080", "10.0.0.3:8080"]);
        assert_eq!(endpoints.version(), 3);
    }

    #[test]
    fn test_snapshot_is_not_mutated_by_updates() {
        let service = ServiceId::new("orders");
        let endpoints = ServiceEndpoints::new(service.clone());
        endpoints.apply(&RegistryEvent::full(service.clone(), vec![instance("10.0.0.1")], 1));

        let snapshot = endpoints.group();
        endpoints.apply(&RegistryEvent::add(service, vec![instance("10.0.0.2")], 2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(endpoints.group().len(), 2);
    }

    #[test]
    fn test_unchanged_instances_keep_endpoint() {
        let service = ServiceId::new("orders");
        let endpoints = ServiceEndpoints::new(service.clone());
        endpoints.apply(&RegistryEvent::full(service.clone(), vec![instance("10.0.0.1")], 1));
        let before = endpoints.group().endpoints()[0].clone();

        endpoints.apply(&RegistryEvent::full(
            service,
            vec![instance("10.0.0.1"), instance("10.0.0.2")],
            2,
        ));
        let after = endpoints.group().endpoints()[0].clone();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_foreign_service_event_is_ignored() {
        let endpoints = ServiceEndpoints::new(ServiceId::new("orders"));
        endpoints.apply(&RegistryEvent::full(
            ServiceId::new("payments"),
            vec![instance("10.0.0.1")],
            1,
        ));
        assert!(endpoints.group().is_empty());
    }

    #[test]
    fn test_callback_applies_events() {
        let service = ServiceId::new("orders");
        let endpoints = Arc::new(ServiceEndpoints::new(service.clone()));
        let callback = endpoints.callback();
        callback(RegistryEvent::full(service, vec![instance("10.0.0.9")], 7));
        assert_eq!(addresses(&endpoints), vec!["10.0.0.9:8080"]);
    }
}
