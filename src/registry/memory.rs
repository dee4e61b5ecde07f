//! 进程内注册中心

use super::{Registry, RegistryCallback, RegistryEvent, ServiceId};
use crate::endpoint::ServiceInstance;
use crate::error::RegistryError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// 进程内注册中心
///
/// 订阅时推送一次全量，之后每次注册和注销推送增量。
#[derive(Default)]
pub struct MemoryRegistry {
    instances: DashMap<ServiceId, BTreeMap<String, ServiceInstance>>,
    subscribers: DashMap<ServiceId, Vec<RegistryCallback>>,
    version: AtomicU64,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 服务当前实例
    pub fn instances(&self, service: &ServiceId) -> Vec<ServiceInstance> {
        self.instances
            .get(service)
            .map(|entry| entry.values().cloned().collect())
            .unwrap_or_default()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 通知订阅者，回调在锁外执行
    fn publish(&self, event: RegistryEvent) {
        let callbacks = self
            .subscribers
            .get(&event.service)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    fn name(&self) -> &str {
        "memory"
    }

    async fn register(
        &self,
        service: &ServiceId,
        instance: ServiceInstance,
    ) -> Result<(), RegistryError> {
        let previous = self
            .instances
            .entry(service.clone())
            .or_default()
            .insert(instance.address(), instance.clone());

        let version = self.next_version();
        let event = match previous {
            Some(old) if old == instance => return Ok(()),
            Some(_) => RegistryEvent::update(service.clone(), vec![instance], version),
            None => RegistryEvent::add(service.clone(), vec![instance], version),
        };
        debug!("Memory registry {:?} {} v{}", event.kind, service, version);
        self.publish(event);
        Ok(())
    }

    async fn unregister(
        &self,
        service: &ServiceId,
        instance: &ServiceInstance,
    ) -> Result<(), RegistryError> {
        let removed = self
            .instances
            .get_mut(service)
            .and_then(|mut entry| entry.remove(&instance.address()));
        match removed {
            Some(removed) => {
                let version = self.next_version();
                self.publish(RegistryEvent::remove(service.clone(), vec![removed], version));
                Ok(())
            }
            None => Err(RegistryError::NotFound(instance.address())),
        }
    }

    async fn subscribe(
        &self,
        service: &ServiceId,
        callback: RegistryCallback,
    ) -> Result<(), RegistryError> {
        self.subscribers
            .entry(service.clone())
            .or_default()
            .push(callback.clone());

        let snapshot = RegistryEvent::full(
            service.clone(),
            self.instances(service),
            self.version.load(Ordering::Acquire),
        );
        callback(snapshot);
        Ok(())
    }

    async fn unsubscribe(&self, service: &ServiceId) -> Result<(), RegistryError> {
        self.subscribers.remove(service);
        Ok(())
    }
}
