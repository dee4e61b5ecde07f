//! 限流集成测试
//!
//! 使用计数限流器验证策略评估顺序、条件匹配和工厂解析

use crate::common::{SpyFactory, SpyLimiter};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use trafficgate::config::GovernanceConfig;
use trafficgate::error::Permission;
use trafficgate::governor::Governor;
use trafficgate::invocation::ServiceRequest;
use trafficgate::limiter_manager::LimiterManager;
use trafficgate::policy::{LimitAlgorithm, PolicyCondition, RateLimitPolicy, ServicePolicy};
use trafficgate::registry::ServiceId;

fn policy(name: &str, realize_type: &str) -> RateLimitPolicy {
    RateLimitPolicy::new(
        name,
        LimitAlgorithm::FixedWindow {
            window_size: "1s".to_string(),
            max_requests: 10,
        },
    )
    .with_realize_type(realize_type)
}

fn request(path: &str) -> ServiceRequest {
    ServiceRequest::new(ServiceId::new("orders")).with_path(path)
}

#[tokio::test]
async fn test_first_rejection_stops_evaluation() {
    let first = SpyLimiter::new(false);
    let second = SpyLimiter::new(true);
    let manager = LimiterManager::new("first");
    manager.register_factory(SpyFactory::new("first", first.clone()));
    manager.register_factory(SpyFactory::new("second", second.clone()));

    let policies = vec![policy("a", "first"), policy("b", "second")];
    let permission = manager.acquire(&request("/"), &policies).await.unwrap();

    assert_eq!(permission, Permission::failure("rejected by spy"));
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);

    first.allow.store(true, Ordering::SeqCst);
    let permission = manager.acquire(&request("/"), &policies).await.unwrap();
    assert!(permission.is_success());
    assert_eq!(first.calls(), 2);
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn test_unmatched_policy_is_skipped() {
    let spy = SpyLimiter::new(false);
    let manager = LimiterManager::new("spy");
    manager.register_factory(SpyFactory::new("spy", spy.clone()));

    let policies = vec![policy("api", "spy").with_condition(PolicyCondition::PathPrefix {
        prefix: "/api".to_string(),
    })];

    assert!(manager
        .acquire(&request("/health"), &policies)
        .await
        .unwrap()
        .is_success());
    assert_eq!(spy.calls(), 0);

    assert!(!manager
        .acquire(&request("/api/orders"), &policies)
        .await
        .unwrap()
        .is_success());
    assert_eq!(spy.calls(), 1);
}

#[tokio::test]
async fn test_factory_resolution_falls_back() {
    let spy = SpyLimiter::new(true);
    let factory = SpyFactory::new("spy", spy.clone());
    let manager = LimiterManager::new("missing");
    manager.register_factory(factory.clone());

    // 未知实现类型和未知默认类型都回落到最先注册的工厂
    let policies = vec![policy("api", "unknown")];
    for _ in 0..3 {
        assert!(manager
            .acquire(&request("/"), &policies)
            .await
            .unwrap()
            .is_success());
    }
    assert_eq!(spy.calls(), 3);
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    assert_eq!(manager.limiter_count(), 1);
}

#[tokio::test]
async fn test_governor_uses_injected_manager() {
    let spy = SpyLimiter::new(true);
    let manager = Arc::new(LimiterManager::new("spy"));
    manager.register_factory(SpyFactory::new("spy", spy.clone()));

    let mut config = GovernanceConfig::default();
    config
        .services
        .push(ServicePolicy::new("orders").with_rate_limit(policy("api", "spy")));
    let governor = Governor::builder(config)
        .limiter_manager(manager)
        .build()
        .unwrap();

    let (permission, _) = governor.inbound(request("/")).await.unwrap();
    assert!(permission.is_success());
    spy.allow.store(false, Ordering::SeqCst);
    let (permission, _) = governor.inbound(request("/")).await.unwrap();
    assert_eq!(permission, Permission::failure("rejected by spy"));
    assert_eq!(spy.calls(), 2);

    // 其他服务没有策略，不经过限流器
    let other = ServiceRequest::new(ServiceId::new("payments"));
    let (permission, _) = governor.inbound(other).await.unwrap();
    assert!(permission.is_success());
    assert_eq!(spy.calls(), 2);
}
