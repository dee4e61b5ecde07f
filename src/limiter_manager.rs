//! 限流器管理器
//!
//! 持有具名工厂和已创建的限流器，按服务策略执行限流。
//! 管理器是显式对象，由调用方创建并共享，不存在进程级单例。

use crate::constants::LIMITER_TYPE_LOCAL;
use crate::error::{GovernanceError, Permission};
use crate::factory::{LocalRateLimiterFactory, RateLimiterFactory};
use crate::invocation::ServiceRequest;
use crate::limiters::RateLimiter;
use crate::policy::RateLimitPolicy;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, trace};

/// 限流器管理器
pub struct LimiterManager {
    factories: DashMap<String, Arc<dyn RateLimiterFactory>>,
    default_type: String,
    /// 最先注册的工厂，类型都无法解析时使用
    fallback: RwLock<Option<Arc<dyn RateLimiterFactory>>>,
    limiters: DashMap<String, Arc<dyn RateLimiter>>,
}

impl Default for LimiterManager {
    fn default() -> Self {
        let manager = Self::new(LIMITER_TYPE_LOCAL);
        manager.register_factory(Arc::new(LocalRateLimiterFactory));
        manager
    }
}

impl LimiterManager {
    /// 创建不含任何工厂的管理器
    pub fn new(default_type: impl Into<String>) -> Self {
        Self {
            factories: DashMap::new(),
            default_type: default_type.into(),
            fallback: RwLock::new(None),
            limiters: DashMap::new(),
        }
    }

    /// 注册工厂，同名工厂被替换
    pub fn register_factory(&self, factory: Arc<dyn RateLimiterFactory>) {
        let name = factory.type_name().to_string();
        {
            let mut fallback = self.fallback.write();
            if fallback.is_none() {
                *fallback = Some(Arc::clone(&factory));
            }
        }
        if self.factories.insert(name.clone(), factory).is_some() {
            // 旧工厂创建的限流器一并失效
            let suffix = format!("#{}", name);
            self.limiters.retain(|key, _| !key.ends_with(&suffix));
        }
        debug!("Registered rate limiter factory {}", name);
    }

    pub fn default_type(&self) -> &str {
        &self.default_type
    }

    /// 选择工厂：策略声明的类型 -> 默认类型 -> 兜底工厂
    pub fn resolve_factory(&self, policy: &RateLimitPolicy) -> Option<Arc<dyn RateLimiterFactory>> {
        policy
            .realize_type
            .as_deref()
            .and_then(|name| self.factories.get(name).map(|f| Arc::clone(f.value())))
            .or_else(|| {
                self.factories
                    .get(&self.default_type)
                    .map(|f| Arc::clone(f.value()))
            })
            .or_else(|| self.fallback.read().clone())
    }

    /// 获取或创建限流器
    pub fn get_limiter(
        &self,
        service: &str,
        policy: &RateLimitPolicy,
    ) -> Result<Arc<dyn RateLimiter>, GovernanceError> {
        let factory = self.resolve_factory(policy).ok_or_else(|| {
            GovernanceError::LimitError(format!("没有可用的限流器工厂: {}", policy.name))
        })?;
        let key = format!("{}/{}#{}", service, policy.key(), factory.type_name());

        if let Some(limiter) = self.limiters.get(&key) {
            return Ok(Arc::clone(limiter.value()));
        }

        let created = factory.get(&key, policy)?;
        let limiter = self
            .limiters
            .entry(key.clone())
            .or_insert(created)
            .value()
            .clone();
        trace!("Created rate limiter {} ({})", key, limiter.type_name());
        Ok(limiter)
    }

    /// 按顺序评估限流策略
    ///
    /// 命中的策略依次获取许可，第一个拒绝即返回 `Permission::Failure`，后续策略不再评估。
    /// 没有命中或全部通过返回 `Permission::Success`。
    pub async fn acquire(
        &self,
        request: &ServiceRequest,
        policies: &[RateLimitPolicy],
    ) -> Result<Permission, GovernanceError> {
        for policy in policies {
            if !policy.matches(request) {
                continue;
            }

            let limiter = self.get_limiter(&request.service.service, policy)?;
            if !limiter.acquire(1).await? {
                debug!(
                    "Request to {} rejected by policy {} ({})",
                    request.service,
                    policy.name,
                    limiter.type_name()
                );
                return Ok(Permission::failure(format!(
                    "rejected by {}",
                    limiter.type_name()
                )));
            }
        }
        Ok(Permission::success())
    }

    /// 移除服务的全部限流器，下次使用时按新策略重建
    pub fn invalidate(&self, service: &str) {
        let prefix = format!("{}/", service);
        self.limiters.retain(|key, _| !key.starts_with(&prefix));
    }

    /// 已创建的限流器数量
    pub fn limiter_count(&self) -> usize {
        self.limiters.len()
    }

    pub fn clear(&self) {
        self.limiters.clear();
    }
}

impl std::fmt::Debug for LimiterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factories: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("LimiterManager")
            .field("default_type", &self.default_type)
            .field("factories", &factories)
            .field("limiters", &self.limiters.len())
            .finish()
    }
}
