//! Governor 主控制器
//!
//! 把各个组件装配成完整的治理流程：
//! - 注册中心 -> 服务端点视图 -> 路由过滤链
//! - 入站过滤链 -> 限流器管理器
//! - 调用结果 -> 端点熔断器

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::config::{GovernanceConfig, LiveConfig};
use crate::constants::DEFAULT_POLICY_SYNC_KIND;
use crate::endpoint::{Endpoint, Locatable, ServiceInstance, SharedEndpoint};
use crate::error::{GovernanceError, Permission};
use crate::factory::LocalRateLimiterFactory;
use crate::filter::inbound::{
    CellInboundFilter, ConcurrencyLimitInboundFilter, RateLimitInboundFilter, ReadyInboundFilter,
    UnitInboundFilter,
};
use crate::filter::route::default_route_filters;
use crate::filter::{InboundFilter, InboundFilters, RouteFilter, RouteFilters};
use crate::invocation::{InboundInvocation, OutboundInvocation, ServiceRequest};
use crate::limiter_manager::LimiterManager;
use crate::policy::ServicePolicy;
use crate::registry::{MemoryRegistry, Registry, ServiceEndpoints, ServiceId};
use crate::sync::{HttpSubscription, HttpWatcher, SyncEvent, SyncEventKind, SyncKey, SyncListener};
use crate::template::Template;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, trace, warn};

/// 服务策略表
type PolicyTable = DashMap<String, Arc<ServicePolicy>>;

/// 服务端点视图槽位，订阅完成并收到全量事件后才有值
type EndpointsSlot = Arc<OnceCell<Arc<ServiceEndpoints>>>;

// ============================================================================
// 构建器
// ============================================================================

/// Governor 构建器
pub struct GovernorBuilder {
    config: GovernanceConfig,
    registry: Option<Arc<dyn Registry>>,
    limiter_manager: Option<Arc<LimiterManager>>,
    circuit_breaker: CircuitBreakerConfig,
    inbound_filters: Vec<Arc<dyn InboundFilter>>,
    route_filters: Vec<Arc<dyn RouteFilter>>,
    ready: bool,
}

impl GovernorBuilder {
    pub fn new(config: GovernanceConfig) -> Self {
        Self {
            config,
            registry: None,
            limiter_manager: None,
            circuit_breaker: CircuitBreakerConfig::default(),
            inbound_filters: Vec::new(),
            route_filters: Vec::new(),
            ready: true,
        }
    }

    /// 注册中心，默认使用进程内注册中心
    pub fn registry(mut self, registry: Arc<dyn Registry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 限流器管理器，默认只带本地工厂
    pub fn limiter_manager(mut self, manager: Arc<LimiterManager>) -> Self {
        self.limiter_manager = Some(manager);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// 追加入站过滤器，与内置过滤器一起按顺序号排序
    pub fn inbound_filter(mut self, filter: Arc<dyn InboundFilter>) -> Self {
        self.inbound_filters.push(filter);
        self
    }

    /// 追加路由过滤器，与内置过滤器一起按顺序号排序
    pub fn route_filter(mut self, filter: Arc<dyn RouteFilter>) -> Self {
        self.route_filters.push(filter);
        self
    }

    /// 初始就绪状态，默认就绪
    pub fn ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    pub fn build(self) -> Result<Governor, GovernanceError> {
        self.config.validate().map_err(GovernanceError::ConfigError)?;
        self.circuit_breaker
            .validate()
            .map_err(GovernanceError::ConfigError)?;

        let limiter_manager = self.limiter_manager.unwrap_or_else(|| {
            let manager = LimiterManager::new(self.config.limiter.default_type.clone());
            manager.register_factory(Arc::new(LocalRateLimiterFactory));
            Arc::new(manager)
        });
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(MemoryRegistry::new()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(self.circuit_breaker));
        let ready = Arc::new(AtomicBool::new(self.ready));

        let mut inbound: Vec<Arc<dyn InboundFilter>> = vec![
            Arc::new(ReadyInboundFilter::new(Arc::clone(&ready))),
            Arc::new(ConcurrencyLimitInboundFilter::new()),
            Arc::new(RateLimitInboundFilter::new(Arc::clone(&limiter_manager))),
            Arc::new(UnitInboundFilter),
            Arc::new(CellInboundFilter),
        ];
        inbound.extend(self.inbound_filters);

        let mut routes = default_route_filters(Arc::clone(&breakers));
        routes.extend(self.route_filters);

        let policies: PolicyTable = DashMap::new();
        for policy in &self.config.services {
            policies.insert(policy.service.clone(), Arc::new(policy.clone()));
        }

        let inbound = InboundFilters::new(inbound);
        let routes = RouteFilters::new(routes);
        info!(
            "Governor built with registry {}, inbound filters {:?}, route filters {:?}",
            registry.name(),
            inbound.names(),
            routes.names()
        );

        Ok(Governor {
            live: Arc::new(self.config.live.clone()),
            config: self.config,
            limiter_manager,
            registry,
            policies: Arc::new(policies),
            services: DashMap::new(),
            breakers,
            ready,
            inbound,
            routes,
        })
    }
}

// ============================================================================
// Governor
// ============================================================================

/// Governor 主控制器
///
/// # 示例
///
/// ```rust
/// use trafficgate::config::GovernanceConfig;
/// use trafficgate::endpoint::{Locatable, ServiceInstance};
/// use trafficgate::governor::Governor;
/// use trafficgate::invocation::ServiceRequest;
/// use trafficgate::registry::ServiceId;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let governor = Governor::builder(GovernanceConfig::default()).build()?;
/// let service = ServiceId::new("orders");
/// governor.register(&service, ServiceInstance::new("10.0.0.1", 8080)).await?;
///
/// let endpoint = governor.route(ServiceRequest::new(service)).await?;
/// assert_eq!(endpoint.address(), "10.0.0.1:8080");
/// # Ok(())
/// # }
/// ```
pub struct Governor {
    config: GovernanceConfig,
    live: Arc<LiveConfig>,
    limiter_manager: Arc<LimiterManager>,
    registry: Arc<dyn Registry>,
    /// 服务名 -> 策略
    policies: Arc<PolicyTable>,
    /// 已订阅服务的端点视图
    services: DashMap<ServiceId, EndpointsSlot>,
    breakers: Arc<CircuitBreakerRegistry>,
    ready: Arc<AtomicBool>,
    inbound: InboundFilters,
    routes: RouteFilters,
}

impl Governor {
    pub fn builder(config: GovernanceConfig) -> GovernorBuilder {
        GovernorBuilder::new(config)
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    pub fn limiter_manager(&self) -> &Arc<LimiterManager> {
        &self.limiter_manager
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn inbound_filters(&self) -> &InboundFilters {
        &self.inbound
    }

    pub fn route_filters(&self) -> &RouteFilters {
        &self.routes
    }

    // ------------------------------------------------------------------------
    // 就绪状态
    // ------------------------------------------------------------------------

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
        info!("Governor ready: {}", ready);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // 服务策略
    // ------------------------------------------------------------------------

    /// 服务策略，未配置的服务使用空策略
    pub fn policy(&self, service: &str) -> Arc<ServicePolicy> {
        self.policies
            .get(service)
            .map(|p| Arc::clone(p.value()))
            .unwrap_or_else(|| Arc::new(ServicePolicy::new(service)))
    }

    /// 替换服务策略，服务已有的限流器随之失效
    pub fn update_policy(&self, policy: ServicePolicy) -> Result<(), GovernanceError> {
        apply_policy(&self.policies, &self.limiter_manager, policy)
    }

    pub fn remove_policy(&self, service: &str) -> Option<Arc<ServicePolicy>> {
        remove_policy(&self.policies, &self.limiter_manager, service)
    }

    /// 订阅远端服务策略
    ///
    /// `url` 可以使用 `{space_id}`、`{space_version}` 占位符。
    /// 更新事件替换策略，删除事件回退为空策略，错误事件保留现有策略。
    pub fn watch_policy(&self, watcher: &HttpWatcher, service: &str, url: impl Into<Template>) {
        let policies = Arc::clone(&self.policies);
        let manager = Arc::clone(&self.limiter_manager);
        let name = service.to_string();
        let listener: SyncListener<ServicePolicy> =
            Arc::new(move |event: SyncEvent<ServicePolicy>| match event.kind {
                SyncEventKind::Update => {
                    let Some(mut policy) = event.data else {
                        return;
                    };
                    policy.service = name.clone();
                    match apply_policy(&policies, &manager, policy) {
                        Ok(()) => info!("Policy of {} updated to v{}", name, event.version),
                        Err(e) => warn!("Ignored invalid policy of {}: {}", name, e),
                    }
                }
                SyncEventKind::Delete => {
                    remove_policy(&policies, &manager, &name);
                    info!("Policy of {} deleted", name);
                }
                SyncEventKind::Error => {
                    warn!(
                        "Failed to sync policy of {}: {}",
                        name,
                        event.error.unwrap_or_default()
                    );
                }
            });
        let key = SyncKey::new(DEFAULT_POLICY_SYNC_KIND, service);
        watcher.subscribe(Arc::new(HttpSubscription::new(key, url, listener)));
    }

    // ------------------------------------------------------------------------
    // 注册与订阅
    // ------------------------------------------------------------------------

    #[instrument(skip(self, instance))]
    pub async fn register(
        &self,
        service: &ServiceId,
        instance: ServiceInstance,
    ) -> Result<(), GovernanceError> {
        self.registry.register(service, instance).await?;
        Ok(())
    }

    #[instrument(skip(self, instance))]
    pub async fn unregister(
        &self,
        service: &ServiceId,
        instance: &ServiceInstance,
    ) -> Result<(), GovernanceError> {
        self.registry.unregister(service, instance).await?;
        Ok(())
    }

    /// 服务端点视图，首次使用时订阅注册中心
    ///
    /// 订阅进行中的并发调用等待同一次订阅完成；订阅失败时槽位保持为空，由下一个调用重新订阅。
    pub async fn endpoints(
        &self,
        service: &ServiceId,
    ) -> Result<Arc<ServiceEndpoints>, GovernanceError> {
        let slot = Arc::clone(self.services.entry(service.clone()).or_default().value());

        let endpoints = slot
            .get_or_try_init(|| async {
                let endpoints = Arc::new(ServiceEndpoints::new(service.clone()));
                debug!("Subscribing {} from registry {}", service, self.registry.name());
                self.registry.subscribe(service, endpoints.callback()).await?;
                Ok::<_, GovernanceError>(endpoints)
            })
            .await?;
        Ok(Arc::clone(endpoints))
    }

    /// 已完成订阅的服务数量
    pub fn subscription_count(&self) -> usize {
        self.services
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    /// 取消全部订阅
    #[instrument(skip(self))]
    pub async fn close(&self) -> Result<(), GovernanceError> {
        let services: Vec<ServiceId> = self.services.iter().map(|e| e.key().clone()).collect();
        for service in services {
            let Some((_, slot)) = self.services.remove(&service) else {
                continue;
            };
            if !slot.initialized() {
                continue;
            }
            if let Err(e) = self.registry.unsubscribe(&service).await {
                warn!("Failed to unsubscribe {}: {}", service, e);
            }
        }
        info!("Governor closed");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // 入站
    // ------------------------------------------------------------------------

    /// 执行入站过滤链
    ///
    /// 返回的调用持有并发许可等资源，调用方应在请求处理完成后再丢弃。
    pub async fn inbound(
        &self,
        request: ServiceRequest,
    ) -> Result<(Permission, InboundInvocation), GovernanceError> {
        let policy = self.policy(&request.service.service);
        let mut invocation = InboundInvocation::new(request, policy, Arc::clone(&self.live));
        let permission = self.inbound.execute(&mut invocation).await?;
        if let Permission::Failure(reason) = &permission {
            debug!("Inbound request to {} rejected: {}", invocation.request.service, reason);
        }
        Ok((permission, invocation))
    }

    // ------------------------------------------------------------------------
    // 出站
    // ------------------------------------------------------------------------

    /// 执行路由过滤链，返回完成路由的调用
    pub async fn outbound(
        &self,
        request: ServiceRequest,
    ) -> Result<OutboundInvocation, GovernanceError> {
        let endpoints = self.endpoints(&request.service).await?;
        let policy = self.policy(&request.service.service);
        let mut invocation =
            OutboundInvocation::new(request, policy, Arc::clone(&self.live), endpoints.group());
        self.routes.execute(&mut invocation);
        trace!(
            "Routed {} to {} endpoints",
            invocation.request.service,
            invocation.target.len()
        );
        Ok(invocation)
    }

    /// 为请求选择一个端点
    pub async fn route(&self, request: ServiceRequest) -> Result<SharedEndpoint, GovernanceError> {
        let invocation = self.outbound(request).await?;
        invocation.target.first().cloned().ok_or_else(|| {
            GovernanceError::RouteError(format!(
                "no available endpoint for {}",
                invocation.request.service
            ))
        })
    }

    // ------------------------------------------------------------------------
    // 调用结果反馈
    // ------------------------------------------------------------------------

    pub fn on_success(&self, endpoint: &dyn Endpoint) {
        self.breakers.on_success(endpoint.id());
    }

    pub fn on_failure(&self, endpoint: &dyn Endpoint) {
        debug!("Call to {} failed", endpoint.id());
        self.breakers.on_failure(endpoint.id());
    }
}

impl std::fmt::Debug for Governor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Governor")
            .field("registry", &self.registry.name())
            .field("policies", &self.policies.len())
            .field("services", &self.subscription_count())
            .field("ready", &self.is_ready())
            .finish()
    }
}

fn apply_policy(
    policies: &PolicyTable,
    manager: &LimiterManager,
    policy: ServicePolicy,
) -> Result<(), GovernanceError> {
    policy.validate().map_err(GovernanceError::ConfigError)?;
    let service = policy.service.clone();
    policies.insert(service.clone(), Arc::new(policy));
    manager.invalidate(&service);
    Ok(())
}

fn remove_policy(
    policies: &PolicyTable,
    manager: &LimiterManager,
    service: &str,
) -> Option<Arc<ServicePolicy>> {
    let removed = policies.remove(service).map(|(_, policy)| policy);
    manager.invalidate(service);
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{HEADER_LANE, HEADER_LIVE_UNIT, LABEL_LANE, LABEL_UNIT};
    use crate::error::RegistryError;
    use crate::policy::{LimitAlgorithm, RateLimitPolicy};
    use crate::registry::RegistryCallback;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn governor(config: GovernanceConfig) -> Governor {
        Governor::builder(config).build().unwrap()
    }

    /// 订阅前先等待一段时间的注册中心
    struct SlowRegistry {
        inner: MemoryRegistry,
        delay: Duration,
        fail_next: AtomicBool,
        subscribe_calls: AtomicUsize,
    }

    impl SlowRegistry {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryRegistry::new(),
                delay,
                fail_next: AtomicBool::new(false),
                subscribe_calls: AtomicUsize::new(0),
            })
        }

        fn subscribe_calls(&self) -> usize {
            self.subscribe_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Registry for SlowRegistry {
        fn name(&self) -> &str {
            "slow"
        }

        async fn register(
            &self,
            service: &ServiceId,
            instance: ServiceInstance,
        ) -> Result<(), RegistryError> {
            self.inner.register(service, instance).await
        }

        async fn unregister(
            &self,
            service: &ServiceId,
            instance: &ServiceInstance,
        ) -> Result<(), RegistryError> {
            self.inner.unregister(service, instance).await
        }

        async fn subscribe(
            &self,
            service: &ServiceId,
            callback: RegistryCallback,
        ) -> Result<(), RegistryError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(RegistryError::ConnectionError("connection loss".to_string()));
            }
            self.inner.subscribe(service, callback).await
        }

        async fn unsubscribe(&self, service: &ServiceId) -> Result<(), RegistryError> {
            self.inner.unsubscribe(service).await
        }
    }

    fn slow_governor(registry: &Arc<SlowRegistry>) -> Governor {
        Governor::builder(GovernanceConfig::default())
            .registry(Arc::clone(registry) as Arc<dyn Registry>)
            .build()
            .unwrap()
    }

    async fn register(governor: &Governor, service: &ServiceId, instances: Vec<ServiceInstance>) {
        for instance in instances {
            governor.register(service, instance).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_route_prefers_local_unit() {
        let mut config = GovernanceConfig::default();
        config.live.local_unit = "u1".to_string();
        let governor = governor(config);
        let service = ServiceId::new("orders");
        register(
            &governor,
            &service,
            vec![
                ServiceInstance::new("10.0.0.1", 80).with_label(LABEL_UNIT, "u1"),
                ServiceInstance::new("10.0.0.2", 80).with_label(LABEL_UNIT, "u2"),
            ],
        )
        .await;

        for _ in 0..10 {
            let endpoint = governor.route(ServiceRequest::new(service.clone())).await.unwrap();
            assert_eq!(endpoint.host(), "10.0.0.1");
        }

        let request = ServiceRequest::new(service.clone()).with_header(HEADER_LIVE_UNIT, "u2");
        let invocation = governor.outbound(request).await.unwrap();
        assert_eq!(invocation.target.first().unwrap().host(), "10.0.0.2");
        assert_eq!(invocation.target.unit(), Some("u2"));
        assert_eq!(governor.subscription_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_route_waits_for_first_snapshot() {
        let registry = SlowRegistry::new(Duration::from_millis(50));
        let governor = slow_governor(&registry);
        let service = ServiceId::new("orders");
        register(&governor, &service, vec![ServiceInstance::new("10.0.0.1", 80)]).await;

        let (first, second) = tokio::join!(
            governor.route(ServiceRequest::new(service.clone())),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                governor.route(ServiceRequest::new(service.clone())).await
            }
        );
        assert_eq!(first.unwrap().address(), "10.0.0.1:80");
        assert_eq!(second.unwrap().address(), "10.0.0.1:80");
        assert_eq!(registry.subscribe_calls(), 1);
        assert_eq!(governor.subscription_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_subscription_retried_by_waiting_caller() {
        let registry = SlowRegistry::new(Duration::from_millis(50));
        registry.fail_next.store(true, Ordering::SeqCst);
        let governor = slow_governor(&registry);
        let service = ServiceId::new("orders");
        register(&governor, &service, vec![ServiceInstance::new("10.0.0.1", 80)]).await;

        let (first, second) = tokio::join!(
            governor.route(ServiceRequest::new(service.clone())),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                governor.route(ServiceRequest::new(service.clone())).await
            }
        );
        assert!(matches!(first, Err(GovernanceError::RegistryError(_))));
        assert_eq!(second.unwrap().address(), "10.0.0.1:80");
        assert_eq!(registry.subscribe_calls(), 2);
        assert_eq!(governor.subscription_count(), 1);

        governor.route(ServiceRequest::new(service)).await.unwrap();
        assert_eq!(registry.subscribe_calls(), 2);
    }

    #[tokio::test]
    async fn test_route_without_endpoints_fails() {
        let governor = governor(GovernanceConfig::default());
        let result = governor.route(ServiceRequest::new(ServiceId::new("missing"))).await;
        assert!(matches!(result, Err(GovernanceError::RouteError(_))));
    }

    #[tokio::test]
    async fn test_route_follows_lane() {
        let governor = governor(GovernanceConfig::default());
        let service = ServiceId::new("orders");
        register(
            &governor,
            &service,
            vec![
                ServiceInstance::new("10.0.0.1", 80),
                ServiceInstance::new("10.0.0.2", 80).with_label(LABEL_LANE, "beta"),
            ],
        )
        .await;

        for _ in 0..10 {
            let beta = ServiceRequest::new(service.clone()).with_header(HEADER_LANE, "beta");
            assert_eq!(governor.route(beta).await.unwrap().host(), "10.0.0.2");

            // 泳道不存在时回落到基础泳道
            let gamma = ServiceRequest::new(service.clone()).with_header(HEADER_LANE, "gamma");
            assert_eq!(governor.route(gamma).await.unwrap().host(), "10.0.0.1");
        }
    }

    #[tokio::test]
    async fn test_failures_open_instance_breaker() {
        let governor = Governor::builder(GovernanceConfig::default())
            .circuit_breaker(CircuitBreakerConfig::new(
                2,
                1,
                std::time::Duration::from_secs(60),
            ))
            .build()
            .unwrap();
        let service = ServiceId::new("orders");
        register(
            &governor,
            &service,
            vec![
                ServiceInstance::new("10.0.0.1", 80),
                ServiceInstance::new("10.0.0.2", 80),
            ],
        )
        .await;

        let broken = governor.route(ServiceRequest::new(service.clone())).await.unwrap();
        governor.on_failure(&*broken);
        governor.on_failure(&*broken);

        for _ in 0..10 {
            let endpoint = governor.route(ServiceRequest::new(service.clone())).await.unwrap();
            assert_ne!(endpoint.address(), broken.address());
        }
    }

    #[tokio::test]
    async fn test_inbound_rate_limit_and_policy_update() {
        let mut config = GovernanceConfig::default();
        config.services.push(ServicePolicy::new("orders").with_rate_limit(RateLimitPolicy::new(
            "api",
            LimitAlgorithm::FixedWindow {
                window_size: "1h".to_string(),
                max_requests: 1,
            },
        )));
        let governor = governor(config);
        let request = || ServiceRequest::new(ServiceId::new("orders"));

        let (first, _) = governor.inbound(request()).await.unwrap();
        assert!(first.is_success());
        let (second, _) = governor.inbound(request()).await.unwrap();
        assert_eq!(second, Permission::failure("rejected by fixed_window"));

        governor.update_policy(ServicePolicy::new("orders")).unwrap();
        assert_eq!(governor.limiter_manager().limiter_count(), 0);
        let (third, _) = governor.inbound(request()).await.unwrap();
        assert!(third.is_success());
    }

    #[tokio::test]
    async fn test_not_ready_rejects_inbound() {
        let governor = Governor::builder(GovernanceConfig::default())
            .ready(false)
            .build()
            .unwrap();
        let request = ServiceRequest::new(ServiceId::new("orders"));
        let (permission, _) = governor.inbound(request.clone()).await.unwrap();
        assert!(!permission.is_success());

        governor.set_ready(true);
        let (permission, _) = governor.inbound(request).await.unwrap();
        assert!(permission.is_success());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = GovernanceConfig::default();
        config.version.clear();
        assert!(matches!(
            Governor::builder(config).build(),
            Err(GovernanceError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_close_unsubscribes() {
        let governor = governor(GovernanceConfig::default());
        governor
            .endpoints(&ServiceId::new("orders"))
            .await
            .unwrap();
        assert_eq!(governor.subscription_count(), 1);
        governor.close().await.unwrap();
        assert_eq!(governor.subscription_count(), 0);
    }
}
