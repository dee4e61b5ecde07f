//! 配置加载集成测试
//!
//! 从文件加载配置并构建 Governor

use std::io::Write;
use trafficgate::config::GovernanceConfig;
use trafficgate::governor::Governor;
use trafficgate::invocation::ServiceRequest;
use trafficgate::policy::LoadBalancerKind;
use trafficgate::registry::ServiceId;

const CONFIG: &str = r#"
version: "1.0"
live:
  local_unit: u1
  local_cell: c1
watcher:
  url: "http://config/{space_id}/policies"
  interval_ms: 2000
services:
  - service: orders
    concurrency_limit: 1
    load_balancer: round_robin
"#;

fn write_config(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_governor_from_yaml_file() {
    let file = write_config(".yaml", CONFIG);
    let config = GovernanceConfig::load_from_file(file.path()).unwrap();
    assert_eq!(config.live.local_unit, "u1");
    assert_eq!(config.watcher.interval_ms, 2000);

    let governor = Governor::builder(config).build().unwrap();
    let policy = governor.policy("orders");
    assert_eq!(policy.load_balancer, LoadBalancerKind::RoundRobin);

    let request = || ServiceRequest::new(ServiceId::new("orders"));
    let (first, held) = governor.inbound(request()).await.unwrap();
    assert!(first.is_success());
    let (second, _) = governor.inbound(request()).await.unwrap();
    assert!(!second.is_success());

    drop(held);
    let (third, _) = governor.inbound(request()).await.unwrap();
    assert!(third.is_success());
}

#[test]
fn test_invalid_file_rejected() {
    let file = write_config(".yaml", "version: \"1.0\"\nservices:\n  - service: \"\"\n");
    assert!(GovernanceConfig::load_from_file(file.path()).is_err());

    let file = write_config(".ini", CONFIG);
    assert!(GovernanceConfig::load_from_file(file.path()).is_err());
}
