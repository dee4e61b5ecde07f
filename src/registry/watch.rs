//! 推送式注册中心
//!
//! 实例以临时节点形式注册在 `/{root}/{namespace}/{group}/{service}/{host:port}`，
//! 节点数据为 JSON 编码的 [`ServiceInstance`]。订阅使用服务目录上的持久子节点监听。
//!
//! 会话丢失后，临时节点和监听可能已失效：重连时推进重试版本并重新调度注册和订阅任务，
//! 重连前调度的旧任务在执行前发现版本失效后自行放弃。

use super::retry::VersionedRetry;
use super::{Registry, RegistryCallback, RegistryEvent, ServiceId};
use crate::constants::{
    DEFAULT_REGISTRY_ROOT, DEFAULT_RETRY_INITIAL_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS,
};
use crate::endpoint::ServiceInstance;
use crate::error::RegistryError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

// ============================================================================
// 客户端端口
// ============================================================================

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// 首次连接成功
    Connected,
    /// 连接中断，会话可能仍然有效
    Suspended,
    /// 会话丢失，临时节点和监听失效
    Lost,
    /// 重新连接成功
    Reconnected,
}

/// 子节点
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    /// 节点名（不含父路径）
    pub name: String,
    pub data: Vec<u8>,
}

/// 子节点监听器，每次变化推送全部子节点
pub type NodeListener = Arc<dyn Fn(Vec<NodeData>) + Send + Sync>;

/// 连接状态监听器
pub type ConnectionListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// 监听式协调服务客户端
#[async_trait]
pub trait WatchClient: Send + Sync + 'static {
    /// 创建临时节点（父节点不存在时一并创建），已存在返回 [`RegistryError::NodeExists`]
    async fn create_ephemeral(&self, path: &str, data: Vec<u8>) -> Result<(), RegistryError>;

    /// 删除节点，不存在返回 [`RegistryError::NotFound`]
    async fn delete(&self, path: &str) -> Result<(), RegistryError>;

    /// 在目录上建立持久子节点监听，建立后立即推送一次当前子节点
    async fn watch_children(&self, path: &str, listener: NodeListener) -> Result<(), RegistryError>;

    /// 移除监听
    async fn unwatch(&self, path: &str) -> Result<(), RegistryError>;

    /// 注册连接状态监听器
    fn add_connection_listener(&self, listener: ConnectionListener);
}

// ============================================================================
// 注册中心
// ============================================================================

/// 推送式注册中心配置
#[derive(Debug, Clone)]
pub struct WatchRegistryConfig {
    /// 根路径
    pub root: String,
    /// 重试初始等待
    pub retry_initial_delay: Duration,
    /// 重试最大等待
    pub retry_max_delay: Duration,
}

impl Default for WatchRegistryConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_REGISTRY_ROOT.to_string(),
            retry_initial_delay: Duration::from_millis(DEFAULT_RETRY_INITIAL_DELAY_MS),
            retry_max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        }
    }
}

/// 订阅状态
struct WatchSubscription {
    service: ServiceId,
    callbacks: RwLock<Vec<RegistryCallback>>,
    /// 最近一次推送的实例，`None` 表示尚未收到快照
    cache: Mutex<Option<BTreeMap<String, ServiceInstance>>>,
    version: AtomicU64,
}

impl WatchSubscription {
    fn new(service: ServiceId) -> Self {
        Self {
            service,
            callbacks: RwLock::new(Vec::new()),
            cache: Mutex::new(None),
            version: AtomicU64::new(0),
        }
    }

    /// 处理子节点推送：首次推送全量，之后推送增量
    fn on_children(&self, children: Vec<NodeData>) {
        let mut current = BTreeMap::new();
        for child in children {
            match serde_json::from_slice::<ServiceInstance>(&child.data) {
                Ok(instance) => {
                    current.insert(instance.address(), instance);
                }
                Err(e) => warn!(
                    "Failed to decode instance node {} of {}: {}",
                    child.name, self.service, e
                ),
            }
        }

        let events = {
            let mut cache = self.cache.lock();
            let events = match cache.as_ref() {
                None => {
                    let version = self.next_version();
                    vec![RegistryEvent::full(
                        self.service.clone(),
                        current.values().cloned().collect(),
                        version,
                    )]
                }
                Some(previous) => self.diff(previous, &current),
            };
            *cache = Some(current);
            events
        };

        let callbacks = self.callbacks.read().clone();
        for event in events {
            for callback in &callbacks {
                callback(event.clone());
            }
        }
    }

    fn diff(
        &self,
        previous: &BTreeMap<String, ServiceInstance>,
        current: &BTreeMap<String, ServiceInstance>,
    ) -> Vec<RegistryEvent> {
        let mut added = Vec::new();
        let mut updated = Vec::new();
        for (address, instance) in current {
            match previous.get(address) {
                None => added.push(instance.clone()),
                Some(old) if old != instance => updated.push(instance.clone()),
                Some(_) => {}
            }
        }
        let removed: Vec<_> = previous
            .iter()
            .filter(|(address, _)| !current.contains_key(*address))
            .map(|(_, instance)| instance.clone())
            .collect();

        let mut events = Vec::new();
        if !added.is_empty() {
            events.push(RegistryEvent::add(self.service.clone(), added, self.next_version()));
        }
        if !removed.is_empty() {
            events.push(RegistryEvent::remove(self.service.clone(), removed, self.next_version()));
        }
        if !updated.is_empty() {
            events.push(RegistryEvent::update(self.service.clone(), updated, self.next_version()));
        }
        events
    }

    /// 当前快照，供后加入的订阅者使用
    fn snapshot(&self) -> Option<RegistryEvent> {
        self.cache.lock().as_ref().map(|cache| {
            RegistryEvent::full(
                self.service.clone(),
                cache.values().cloned().collect(),
                self.version.load(Ordering::Acquire),
            )
        })
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }
}

struct Inner<C: WatchClient> {
    client: Arc<C>,
    config: WatchRegistryConfig,
    /// 节点路径 -> 实例
    registered: DashMap<String, ServiceInstance>,
    subscriptions: DashMap<ServiceId, Arc<WatchSubscription>>,
    retry: VersionedRetry,
    state: Mutex<ConnectionState>,
}

/// 推送式注册中心
pub struct WatchRegistry<C: WatchClient> {
    inner: Arc<Inner<C>>,
}

impl<C: WatchClient> Clone for WatchRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: WatchClient> WatchRegistry<C> {
    /// 创建注册中心并监听客户端连接状态
    pub fn new(client: Arc<C>, config: WatchRegistryConfig) -> Self {
        let inner = Arc::new(Inner {
            client,
            retry: VersionedRetry::new(config.retry_initial_delay, config.retry_max_delay),
            config,
            registered: DashMap::new(),
            subscriptions: DashMap::new(),
            state: Mutex::new(ConnectionState::Connected),
        });

        let weak: Weak<Inner<C>> = Arc::downgrade(&inner);
        inner
            .client
            .add_connection_listener(Arc::new(move |state: ConnectionState| {
                if let Some(inner) = weak.upgrade() {
                    Inner::on_connection_state(&inner, state);
                }
            }));

        Self { inner }
    }

    /// 服务目录路径
    pub fn service_path(&self, service: &ServiceId) -> String {
        self.inner.service_path(service)
    }

    /// 实例节点路径
    pub fn instance_path(&self, service: &ServiceId, instance: &ServiceInstance) -> String {
        self.inner.instance_path(service, instance)
    }

    /// 最近一次连接状态
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// 重试调度器
    pub fn retry(&self) -> &VersionedRetry {
        &self.inner.retry
    }

    /// 已注册的实例数
    pub fn registered_count(&self) -> usize {
        self.inner.registered.len()
    }
}

impl<C: WatchClient> Inner<C> {
    fn service_path(&self, service: &ServiceId) -> String {
        format!(
            "{}/{}/{}/{}",
            self.config.root.trim_end_matches('/'),
            service.namespace,
            service.group,
            service.service
        )
    }

    fn instance_path(&self, service: &ServiceId, instance: &ServiceInstance) -> String {
        format!("{}/{}", self.service_path(service), instance.address())
    }

    /// 创建临时节点，残留的同名节点先删除再创建
    async fn create_node(&self, path: &str, instance: &ServiceInstance) -> Result<(), RegistryError> {
        let data = serde_json::to_vec(instance)
            .map_err(|e| RegistryError::CodecError(e.to_string()))?;
        match self.client.create_ephemeral(path, data.clone()).await {
            Err(RegistryError::NodeExists(_)) => {
                debug!("Node {} exists, recreating", path);
                match self.client.delete(path).await {
                    Ok(()) | Err(RegistryError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                self.client.create_ephemeral(path, data).await
            }
            result => result,
        }
    }

    async fn watch(&self, subscription: &Arc<WatchSubscription>) -> Result<(), RegistryError> {
        let path = self.service_path(&subscription.service);
        let target = Arc::clone(subscription);
        self.client
            .watch_children(
                &path,
                Arc::new(move |children: Vec<NodeData>| target.on_children(children)),
            )
            .await
    }

    fn on_connection_state(inner: &Arc<Self>, state: ConnectionState) {
        let previous = std::mem::replace(&mut *inner.state.lock(), state);
        match state {
            ConnectionState::Suspended => {
                warn!("Registry connection suspended");
            }
            ConnectionState::Lost => {
                let version = inner.retry.advance();
                warn!("Registry session lost, retry version advanced to {}", version);
            }
            ConnectionState::Reconnected => Self::recover(inner),
            ConnectionState::Connected => {
                if previous == ConnectionState::Lost {
                    Self::recover(inner);
                }
            }
        }
    }

    /// 重新注册全部实例并重建全部监听
    fn recover(inner: &Arc<Self>) {
        let version = inner.retry.advance();
        info!(
            "Registry reconnected, recovering {} nodes and {} subscriptions (version {})",
            inner.registered.len(),
            inner.subscriptions.len(),
            version
        );

        let nodes: Vec<(String, ServiceInstance)> = inner
            .registered
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        for (path, instance) in nodes {
            let weak = Arc::downgrade(inner);
            let name = format!("register {}", path);
            inner.retry.schedule(name, Duration::ZERO, move || {
                let weak = weak.clone();
                let path = path.clone();
                let instance = instance.clone();
                async move {
                    match weak.upgrade() {
                        // 期间已注销的实例不再恢复
                        Some(inner) if inner.registered.contains_key(&path) => {
                            inner.create_node(&path, &instance).await
                        }
                        _ => Ok(()),
                    }
                }
            });
        }

        let subscriptions: Vec<Arc<WatchSubscription>> = inner
            .subscriptions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for subscription in subscriptions {
            let weak = Arc::downgrade(inner);
            let name = format!("watch {}", subscription.service);
            inner.retry.schedule(name, Duration::ZERO, move || {
                let weak = weak.clone();
                let subscription = Arc::clone(&subscription);
                async move {
                    match weak.upgrade() {
                        Some(inner) if inner.subscriptions.contains_key(&subscription.service) => {
                            inner.watch(&subscription).await
                        }
                        _ => Ok(()),
                    }
                }
            });
        }
    }
}

#[async_trait]
impl<C: WatchClient> Registry for WatchRegistry<C> {
    fn name(&self) -> &str {
        "watch"
    }

    #[instrument(skip(self, instance))]
    async fn register(
        &self,
        service: &ServiceId,
        instance: ServiceInstance,
    ) -> Result<(), RegistryError> {
        let path = self.inner.instance_path(service, &instance);
        self.inner.create_node(&path, &instance).await?;
        self.inner.registered.insert(path.clone(), instance);
        info!("Registered instance node {}", path);
        Ok(())
    }

    #[instrument(skip(self, instance))]
    async fn unregister(
        &self,
        service: &ServiceId,
        instance: &ServiceInstance,
    ) -> Result<(), RegistryError> {
        let path = self.inner.instance_path(service, instance);
        self.inner.registered.remove(&path);
        match self.inner.client.delete(&path).await {
            Ok(()) | Err(RegistryError::NotFound(_)) => {
                info!("Unregistered instance node {}", path);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, callback))]
    async fn subscribe(
        &self,
        service: &ServiceId,
        callback: RegistryCallback,
    ) -> Result<(), RegistryError> {
        // 同一服务只有创建者发起监听，其余调用方加入已有订阅
        let (subscription, created) = match self.inner.subscriptions.entry(service.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let subscription = Arc::new(WatchSubscription::new(service.clone()));
                entry.insert(Arc::clone(&subscription));
                (subscription, true)
            }
        };
        subscription.callbacks.write().push(Arc::clone(&callback));

        if !created {
            // 先登记回调再读快照，首次推送不会遗漏
            if let Some(event) = subscription.snapshot() {
                callback(event);
            }
            return Ok(());
        }

        if let Err(e) = self.inner.watch(&subscription).await {
            self.inner
                .subscriptions
                .remove_if(service, |_, current| Arc::ptr_eq(current, &subscription));
            return Err(e);
        }
        info!("Subscribed {}", service);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unsubscribe(&self, service: &ServiceId) -> Result<(), RegistryError> {
        if self.inner.subscriptions.remove(service).is_some() {
            let path = self.inner.service_path(service);
            self.inner.client.unwatch(&path).await?;
            info!("Unsubscribed {}", service);
        }
        Ok(())
    }
}
