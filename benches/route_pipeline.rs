//! 路由流水线基准测试
//!
//! 测试组合路由过滤链和入站过滤链的延迟

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;
use tokio::runtime::Runtime;
use trafficgate::circuit_breaker::CircuitBreakerRegistry;
use trafficgate::config::{GovernanceConfig, LiveConfig};
use trafficgate::constants::{LABEL_CELL, LABEL_LANE, LABEL_UNIT};
use trafficgate::endpoint::{EndpointGroup, ServiceEndpoint, ServiceInstance, SharedEndpoint};
use trafficgate::filter::route::default_route_filters;
use trafficgate::filter::RouteFilters;
use trafficgate::governor::Governor;
use trafficgate::invocation::{OutboundInvocation, ServiceRequest};
use trafficgate::policy::{LimitAlgorithm, RateLimitPolicy, ServicePolicy};
use trafficgate::registry::ServiceId;

fn group(size: usize) -> Arc<EndpointGroup> {
    let endpoints: Vec<SharedEndpoint> = (0..size)
        .map(|i| {
            let instance = ServiceInstance::new(format!("10.0.{}.{}", i / 250, i % 250), 8080)
                .with_label(LABEL_UNIT, &format!("u{}", i % 3))
                .with_label(LABEL_CELL, &format!("c{}", i % 6))
                .with_label(LABEL_LANE, if i % 10 == 0 { "beta" } else { "" });
            Arc::new(ServiceEndpoint::from_instance(&instance)) as SharedEndpoint
        })
        .collect();
    Arc::new(EndpointGroup::new(endpoints))
}

/// 基准测试：组合路由过滤链
fn bench_route_chain(c: &mut Criterion) {
    let filters = RouteFilters::new(default_route_filters(Arc::new(
        CircuitBreakerRegistry::default(),
    )));
    let live = Arc::new(LiveConfig {
        local_unit: "u1".to_string(),
        local_cell: "c1".to_string(),
        ..Default::default()
    });
    let policy = Arc::new(ServicePolicy::new("orders"));
    let request = ServiceRequest::new(ServiceId::new("orders"));

    let mut bench = c.benchmark_group("route_chain");
    for size in [10usize, 100, 1000] {
        let group = group(size);
        bench.bench_with_input(BenchmarkId::from_parameter(size), &group, |b, group| {
            b.iter(|| {
                let mut invocation = OutboundInvocation::new(
                    request.clone(),
                    Arc::clone(&policy),
                    Arc::clone(&live),
                    Arc::clone(group),
                );
                filters.execute(&mut invocation);
                black_box(invocation.target.first().cloned())
            });
        });
    }
    bench.finish();
}

/// 基准测试：Governor 完整路由
fn bench_governor_route(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut config = GovernanceConfig::default();
    config.live.local_unit = "u1".to_string();
    let governor = Governor::builder(config).build().unwrap();
    let service = ServiceId::new("orders");
    rt.block_on(async {
        for i in 0..100 {
            let instance = ServiceInstance::new(format!("10.0.0.{}", i), 8080)
                .with_label(LABEL_UNIT, &format!("u{}", i % 3));
            governor.register(&service, instance).await.unwrap();
        }
    });

    c.bench_function("governor_route", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(governor.route(ServiceRequest::new(service.clone())).await.unwrap());
            });
        });
    });
}

/// 基准测试：入站过滤链（含令牌桶限流）
fn bench_inbound_chain(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut config = GovernanceConfig::default();
    config.services.push(
        ServicePolicy::new("orders")
            .with_concurrency_limit(1024)
            .with_rate_limit(RateLimitPolicy::new(
                "api",
                LimitAlgorithm::TokenBucket {
                    capacity: 1_000_000,
                    refill_rate: 1_000_000,
                },
            )),
    );
    let governor = Governor::builder(config).build().unwrap();

    c.bench_function("inbound_chain", |b| {
        b.iter(|| {
            rt.block_on(async {
                let request = ServiceRequest::new(ServiceId::new("orders"));
                black_box(governor.inbound(request).await.unwrap());
            });
        });
    });
}

criterion_group!(benches, bench_route_chain, bench_governor_route, bench_inbound_chain);
criterion_main!(benches);
