//! 推送式注册中心集成测试
//!
//! 测试会话丢失、重连恢复以及过期重试任务的放弃

use crate::common::{init_logging, MemoryWatchClient};
use std::sync::Arc;
use std::time::Duration;
use trafficgate::endpoint::ServiceInstance;
use trafficgate::registry::{
    ConnectionState, Registry, ServiceEndpoints, ServiceId, WatchRegistry, WatchRegistryConfig,
};

fn registry(client: &Arc<MemoryWatchClient>) -> WatchRegistry<MemoryWatchClient> {
    init_logging();
    WatchRegistry::new(
        Arc::clone(client),
        WatchRegistryConfig {
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_secs(1),
            ..Default::default()
        },
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribers_share_one_subscription() {
    for _ in 0..20 {
        let client = MemoryWatchClient::new();
        let registry = Arc::new(registry(&client));
        let service = ServiceId::new("orders");
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let subscribers: Vec<Arc<ServiceEndpoints>> = (0..8)
            .map(|_| Arc::new(ServiceEndpoints::new(service.clone())))
            .collect();
        let tasks: Vec<_> = subscribers
            .iter()
            .map(|endpoints| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                let service = service.clone();
                let callback = endpoints.callback();
                tokio::spawn(async move {
                    barrier.wait().await;
                    registry.subscribe(&service, callback).await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(client.watcher_count(), 1);

        registry
            .register(&service, ServiceInstance::new("10.0.0.1", 80))
            .await
            .unwrap();
        for endpoints in &subscribers {
            assert_eq!(endpoints.group().len(), 1);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_restores_nodes_and_watches() {
    let client = MemoryWatchClient::new();
    let registry = registry(&client);
    let service = ServiceId::new("orders");
    let instance = ServiceInstance::new("10.0.0.1", 80);
    let endpoints = Arc::new(ServiceEndpoints::new(service.clone()));

    registry.register(&service, instance.clone()).await.unwrap();
    registry.subscribe(&service, endpoints.callback()).await.unwrap();
    assert_eq!(endpoints.group().len(), 1);
    assert_eq!(
        registry.instance_path(&service, &instance),
        "/trafficgate/default/default/orders/10.0.0.1:80"
    );

    client.expire_session();
    assert_eq!(registry.connection_state(), ConnectionState::Lost);
    assert_eq!(client.node_count(), 0);
    assert_eq!(client.watcher_count(), 0);

    client.emit(ConnectionState::Reconnected);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(client.has_node(&registry.instance_path(&service, &instance)));
    assert_eq!(client.watcher_count(), 1);
    assert_eq!(endpoints.group().len(), 1);
    assert_eq!(registry.retry().version(), 2);
    assert_eq!(registry.connection_state(), ConnectionState::Reconnected);

    // 恢复后的监听继续推送变化
    registry
        .register(&service, ServiceInstance::new("10.0.0.2", 80))
        .await
        .unwrap();
    assert_eq!(endpoints.group().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_stale_recovery_task_is_discarded() {
    let client = MemoryWatchClient::new();
    let registry = registry(&client);
    let service = ServiceId::new("orders");
    let instance = ServiceInstance::new("10.0.0.1", 80);
    registry.register(&service, instance.clone()).await.unwrap();

    // 第一次恢复的注册任务持续失败并进入退避
    client.fail_creates(u32::MAX);
    client.expire_session();
    client.emit(ConnectionState::Reconnected);
    tokio::time::sleep(Duration::from_millis(10)).await;
    let calls = client.create_calls();
    assert_eq!(calls, 2);
    assert!(!client.has_node(&registry.instance_path(&service, &instance)));

    // 再次断开重连，第一次的任务在退避结束后发现版本失效
    client.fail_creates(0);
    client.emit(ConnectionState::Lost);
    client.emit(ConnectionState::Reconnected);
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(client.has_node(&registry.instance_path(&service, &instance)));
    assert_eq!(client.create_calls(), calls + 1);
    assert_eq!(registry.retry().discarded(), 1);
    assert_eq!(registry.retry().version(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_unregistered_instance_is_not_restored() {
    let client = MemoryWatchClient::new();
    let registry = registry(&client);
    let service = ServiceId::new("orders");
    let instance = ServiceInstance::new("10.0.0.1", 80);
    registry.register(&service, instance.clone()).await.unwrap();

    client.expire_session();
    registry.unregister(&service, &instance).await.unwrap();
    assert_eq!(registry.registered_count(), 0);

    client.emit(ConnectionState::Reconnected);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(client.node_count(), 0);
    assert_eq!(client.create_calls(), 1);
}

#[tokio::test]
async fn test_stale_node_is_recreated() {
    let client = MemoryWatchClient::new();
    let registry = registry(&client);
    let service = ServiceId::new("orders");
    let instance = ServiceInstance::new("10.0.0.1", 80);

    registry.register(&service, instance.clone()).await.unwrap();
    registry
        .register(&service, instance.clone().with_weight(50))
        .await
        .unwrap();

    assert_eq!(client.node_count(), 1);
    assert_eq!(client.create_calls(), 3);
    assert_eq!(registry.registered_count(), 1);
}
