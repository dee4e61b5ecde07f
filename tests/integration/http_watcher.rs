//! HTTP 监视器集成测试
//!
//! 测试后台轮询的启动、周期拉取与关闭

use crate::common::MockFetcher;
use std::time::Duration;
use trafficgate::config::{GovernanceConfig, WatcherConfig};
use trafficgate::governor::Governor;
use trafficgate::sync::HttpWatcher;

const POLICY: &str = r#"{"version": 2, "data": {"service": "orders", "concurrency_limit": 8}}"#;

fn config() -> WatcherConfig {
    WatcherConfig {
        interval_ms: 1_000,
        jitter_ms: 0,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_background_polling_lifecycle() {
    let governor = Governor::builder(GovernanceConfig::default()).build().unwrap();
    let fetcher = MockFetcher::new();
    fetcher.respond(200, POLICY);
    let watcher = HttpWatcher::new(config(), fetcher.clone());
    governor.watch_policy(&watcher, "orders", "http://config/orders?v={space_version}");

    watcher.start().unwrap();
    assert!(watcher.is_started());
    assert!(watcher.start().is_err());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(governor.policy("orders").concurrency_limit, Some(8));
    assert_eq!(fetcher.urls().len(), 1);

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    assert_eq!(
        fetcher.urls(),
        vec!["http://config/orders?v=0", "http://config/orders?v=2"]
    );

    watcher.close().await;
    assert!(!watcher.is_started());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.urls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_close() {
    let fetcher = MockFetcher::new();
    let watcher = HttpWatcher::new(config(), fetcher.clone());
    let governor = Governor::builder(GovernanceConfig::default()).build().unwrap();
    governor.watch_policy(&watcher, "orders", "http://config/orders");

    watcher.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    watcher.close().await;
    // 重复关闭无副作用
    watcher.close().await;

    watcher.start().unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    watcher.close().await;
    assert_eq!(fetcher.urls().len(), 2);
}
