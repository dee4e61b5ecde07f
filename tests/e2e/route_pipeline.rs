//! 端到端测试：推送式注册中心到路由结果
//!
//! 测试场景：
//! 1. 实例注册到推送式注册中心
//! 2. 首次路由时订阅并收到全量实例
//! 3. 组合约束依次收窄到本地单元、本地分区的健康实例
//! 4. 实例注销后路由随推送更新
//! 5. 粘滞请求固定到指定端点

use crate::common::{init_logging, MemoryWatchClient};
use std::sync::Arc;
use trafficgate::config::GovernanceConfig;
use trafficgate::constants::{HEADER_STICKY_ID, LABEL_CELL, LABEL_UNIT};
use trafficgate::endpoint::{EndpointState, Locatable, ServiceInstance};
use trafficgate::governor::Governor;
use trafficgate::invocation::ServiceRequest;
use trafficgate::policy::ServicePolicy;
use trafficgate::registry::{ServiceId, WatchRegistry, WatchRegistryConfig};

fn instance(host: &str, unit: &str, cell: &str) -> ServiceInstance {
    ServiceInstance::new(host, 80)
        .with_label(LABEL_UNIT, unit)
        .with_label(LABEL_CELL, cell)
}

async fn setup() -> (Governor, Arc<MemoryWatchClient>, WatchRegistry<MemoryWatchClient>) {
    init_logging();
    let client = MemoryWatchClient::new();
    let registry = WatchRegistry::new(client.clone(), WatchRegistryConfig::default());

    let mut config = GovernanceConfig::default();
    config.live.local_unit = "u1".to_string();
    config.live.local_cell = "c1".to_string();
    let governor = Governor::builder(config)
        .registry(Arc::new(registry.clone()))
        .build()
        .unwrap();
    (governor, client, registry)
}

#[tokio::test]
async fn test_route_through_composed_chain() {
    let (governor, client, registry) = setup().await;
    let service = ServiceId::new("orders");

    let a = instance("10.0.0.1", "u1", "c1");
    let b = instance("10.0.0.2", "u1", "c2");
    let c = instance("10.0.0.3", "u2", "c3");
    let d = instance("10.0.0.4", "u1", "c1").with_state(EndpointState::Disable);
    for i in [&a, &b, &c, &d] {
        governor.register(&service, i.clone()).await.unwrap();
    }
    assert_eq!(client.node_count(), 4);
    assert!(client.has_node(&registry.instance_path(&service, &a)));

    assert_eq!(
        governor.route_filters().names(),
        vec![
            "circuit_breaker+sticky+healthy+live_unit+live_cell",
            "lane",
            "loadbalance",
            "instance_circuit_breaker"
        ]
    );

    for _ in 0..20 {
        let endpoint = governor
            .route(ServiceRequest::new(service.clone()))
            .await
            .unwrap();
        assert_eq!(endpoint.host(), "10.0.0.1");
    }
    assert_eq!(client.watcher_count(), 1);

    // 注销后路由随推送更新
    governor.unregister(&service, &a).await.unwrap();
    let e = instance("10.0.0.5", "u1", "c1");
    governor.register(&service, e.clone()).await.unwrap();
    let endpoints = governor.endpoints(&service).await.unwrap();
    assert_eq!(endpoints.group().len(), 4);
    for _ in 0..20 {
        let endpoint = governor
            .route(ServiceRequest::new(service.clone()))
            .await
            .unwrap();
        assert_eq!(endpoint.host(), "10.0.0.5");
    }

    // 组合约束整体无法满足时不收窄，仍然可以路由
    governor.unregister(&service, &e).await.unwrap();
    assert_eq!(endpoints.group().len(), 3);
    assert!(governor
        .route(ServiceRequest::new(service.clone()))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_sticky_selects_requested_endpoint() {
    let (governor, _client, _registry) = setup().await;
    let service = ServiceId::new("orders");
    for i in [
        instance("10.0.0.1", "u1", "c1"),
        instance("10.0.0.2", "u1", "c1"),
        instance("10.0.0.3", "u2", "c3"),
    ] {
        governor.register(&service, i).await.unwrap();
    }
    governor
        .update_policy(ServicePolicy::new("orders").with_sticky(true))
        .unwrap();

    for _ in 0..20 {
        let request =
            ServiceRequest::new(service.clone()).with_header(HEADER_STICKY_ID, "10.0.0.2:80");
        let invocation = governor.outbound(request).await.unwrap();
        assert_eq!(invocation.target.len(), 1);
        assert_eq!(invocation.target.first().unwrap().host(), "10.0.0.2");
        assert_eq!(invocation.target.unit(), Some("u1"));
        assert_eq!(invocation.target.cell(), Some("c1"));
    }

    // 未开启粘滞时忽略请求头
    governor.update_policy(ServicePolicy::new("orders")).unwrap();
    let mut hosts = std::collections::BTreeSet::new();
    for _ in 0..200 {
        let request =
            ServiceRequest::new(service.clone()).with_header(HEADER_STICKY_ID, "10.0.0.2:80");
        hosts.insert(governor.route(request).await.unwrap().host().to_string());
    }
    assert_eq!(
        hosts.into_iter().collect::<Vec<_>>(),
        vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]
    );
}

#[tokio::test]
async fn test_failed_endpoint_is_avoided_until_success() {
    let (governor, _client, _registry) = setup().await;
    let service = ServiceId::new("orders");
    for i in [
        instance("10.0.0.1", "u1", "c1"),
        instance("10.0.0.2", "u1", "c1"),
        instance("10.0.0.3", "u2", "c3"),
    ] {
        governor.register(&service, i).await.unwrap();
    }

    let broken = governor
        .route(ServiceRequest::new(service.clone()))
        .await
        .unwrap();
    for _ in 0..5 {
        governor.on_failure(&*broken);
    }
    let breaker = governor.circuit_breakers().get(broken.id());
    assert!(!breaker.is_available());

    for _ in 0..20 {
        let endpoint = governor
            .route(ServiceRequest::new(service.clone()))
            .await
            .unwrap();
        assert_ne!(endpoint.id(), broken.id());
    }
}
