//! 端到端测试：远端策略同步到入站限流
//!
//! 测试场景：
//! 1. 监视器拉取到带限流策略的服务策略（UPDATE）
//! 2. 限流生效，第二个请求被拒绝
//! 3. 拉取失败（ERROR）保留现有策略，版本不变
//! 4. 再次更新，版本单调前进，旧限流器失效
//! 5. 策略被删除（DELETE）后回退为空策略

use crate::common::{init_logging, MockFetcher};
use trafficgate::config::{GovernanceConfig, WatcherConfig};
use trafficgate::constants::DEFAULT_POLICY_SYNC_KIND;
use trafficgate::error::Permission;
use trafficgate::governor::Governor;
use trafficgate::invocation::ServiceRequest;
use trafficgate::registry::ServiceId;
use trafficgate::sync::{HttpWatcher, SyncKey};

const POLICY_V3: &str = r#"{
    "code": 200,
    "version": 3,
    "data": {
        "service": "orders",
        "rate_limit_policies": [
            {"name": "api", "algorithm": {"type": "fixed_window", "window_size": "1h", "max_requests": 1}}
        ]
    }
}"#;

const POLICY_UNVERSIONED: &str = r#"{
    "data": {
        "service": "orders",
        "rate_limit_policies": [
            {"name": "api", "version": 1, "algorithm": {"type": "fixed_window", "window_size": "1h", "max_requests": 2}}
        ]
    }
}"#;

fn request() -> ServiceRequest {
    ServiceRequest::new(ServiceId::new("orders"))
}

async fn admitted(governor: &Governor) -> bool {
    let (permission, _invocation) = governor.inbound(request()).await.unwrap();
    permission.is_success()
}

#[tokio::test]
async fn test_policy_sync_drives_rate_limit() {
    init_logging();
    let governor = Governor::builder(GovernanceConfig::default()).build().unwrap();
    let fetcher = MockFetcher::new();
    let watcher = HttpWatcher::new(WatcherConfig::default(), fetcher.clone()).with_space_id("s1");
    governor.watch_policy(
        &watcher,
        "orders",
        "http://config/{space_id}/policies/orders?version={space_version}",
    );
    let key = SyncKey::new(DEFAULT_POLICY_SYNC_KIND, "orders");
    assert_eq!(watcher.version(&key), Some(0));

    // UPDATE
    fetcher.respond(200, POLICY_V3);
    assert_eq!(watcher.poll_once().await, 1);
    assert_eq!(watcher.version(&key), Some(3));
    assert_eq!(governor.policy("orders").rate_limit_policies.len(), 1);
    assert!(admitted(&governor).await);
    let (rejected, _) = governor.inbound(request()).await.unwrap();
    assert_eq!(rejected, Permission::failure("rejected by fixed_window"));

    // ERROR
    fetcher.respond(500, "");
    watcher.poll_once().await;
    assert_eq!(watcher.version(&key), Some(3));
    assert_eq!(governor.policy("orders").rate_limit_policies.len(), 1);
    assert!(!admitted(&governor).await);

    // UPDATE without server version
    fetcher.respond(200, POLICY_UNVERSIONED);
    watcher.poll_once().await;
    assert_eq!(watcher.version(&key), Some(4));
    assert!(admitted(&governor).await);
    assert!(admitted(&governor).await);
    assert!(!admitted(&governor).await);

    // DELETE
    fetcher.respond(404, "");
    watcher.poll_once().await;
    assert_eq!(watcher.version(&key), Some(4));
    assert!(governor.policy("orders").rate_limit_policies.is_empty());
    assert!(admitted(&governor).await);

    assert_eq!(
        fetcher.urls(),
        vec![
            "http://config/s1/policies/orders?version=0",
            "http://config/s1/policies/orders?version=3",
            "http://config/s1/policies/orders?version=3",
            "http://config/s1/policies/orders?version=4",
        ]
    );
}

#[tokio::test]
async fn test_invalid_remote_policy_is_ignored() {
    let governor = Governor::builder(GovernanceConfig::default()).build().unwrap();
    let fetcher = MockFetcher::new();
    let watcher = HttpWatcher::new(WatcherConfig::default(), fetcher.clone());
    governor.watch_policy(&watcher, "orders", "http://config/orders");

    fetcher.respond(200, POLICY_V3);
    watcher.poll_once().await;
    fetcher.respond(
        200,
        r#"{"version": 9, "data": {"service": "orders", "concurrency_limit": 0}}"#,
    );
    watcher.poll_once().await;

    // 版本照常前进，但无效策略不会替换现有策略
    let key = SyncKey::new(DEFAULT_POLICY_SYNC_KIND, "orders");
    assert_eq!(watcher.version(&key), Some(9));
    assert_eq!(governor.policy("orders").rate_limit_policies.len(), 1);
    assert_eq!(governor.policy("orders").concurrency_limit, None);
}
