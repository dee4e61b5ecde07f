//! 测试通用工具模块
//!
//! 提供测试中常用的模拟实现：脚本化 HTTP 拉取、内存协调服务客户端、计数限流器。

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trafficgate::error::{GovernanceError, RegistryError};
use trafficgate::factory::RateLimiterFactory;
use trafficgate::limiters::{AcquireFuture, RateLimiter};
use trafficgate::policy::RateLimitPolicy;
use trafficgate::registry::{ConnectionListener, ConnectionState, NodeData, NodeListener, WatchClient};
use trafficgate::sync::{HttpFetcher, HttpResponse};

/// 初始化测试日志，`RUST_LOG` 控制级别，重复调用无副作用
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// HTTP
// ============================================================================

/// 按顺序返回预设响应，队列为空时返回 304
#[derive(Default)]
pub struct MockFetcher {
    responses: Mutex<VecDeque<Result<HttpResponse, GovernanceError>>>,
    urls: Mutex<Vec<String>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .push_back(Ok(HttpResponse::new(status, body.as_bytes().to_vec())));
    }

    pub fn fail(&self, message: &str) {
        self.responses
            .lock()
            .push_back(Err(GovernanceError::HttpError(message.to_string())));
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl HttpFetcher for MockFetcher {
    async fn get(
        &self,
        url: &str,
        _headers: &BTreeMap<String, String>,
        _timeout: Duration,
    ) -> Result<HttpResponse, GovernanceError> {
        self.urls.lock().push(url.to_string());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpResponse::new(304, Vec::new())))
    }
}

// ============================================================================
// 协调服务
// ============================================================================

/// 内存协调服务客户端
///
/// 节点变化时同步推送给父目录上的监听。`expire_session` 模拟会话丢失：
/// 临时节点和监听全部清除。
#[derive(Default)]
pub struct MemoryWatchClient {
    nodes: Mutex<BTreeMap<String, Vec<u8>>>,
    watchers: Mutex<BTreeMap<String, NodeListener>>,
    listeners: Mutex<Vec<ConnectionListener>>,
    /// 接下来失败的创建次数
    failing_creates: AtomicU32,
    create_calls: AtomicUsize,
}

impl MemoryWatchClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn has_node(&self, path: &str) -> bool {
        self.nodes.lock().contains_key(path)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.lock().len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn fail_creates(&self, times: u32) {
        self.failing_creates.store(times, Ordering::SeqCst);
    }

    /// 通知连接状态
    pub fn emit(&self, state: ConnectionState) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(state);
        }
    }

    /// 会话丢失：清除临时节点和监听后通知
    pub fn expire_session(&self) {
        self.nodes.lock().clear();
        self.watchers.lock().clear();
        self.emit(ConnectionState::Lost);
    }

    fn children(&self, parent: &str) -> Vec<NodeData> {
        let prefix = format!("{}/", parent);
        self.nodes
            .lock()
            .iter()
            .filter_map(|(path, data)| {
                let name = path.strip_prefix(&prefix)?;
                (!name.contains('/')).then(|| NodeData {
                    name: name.to_string(),
                    data: data.clone(),
                })
            })
            .collect()
    }

    fn notify_parent(&self, path: &str) {
        let Some((parent, _)) = path.rsplit_once('/') else {
            return;
        };
        let listener = self.watchers.lock().get(parent).cloned();
        if let Some(listener) = listener {
            listener(self.children(parent));
        }
    }
}

#[async_trait]
impl WatchClient for MemoryWatchClient {
    async fn create_ephemeral(&self, path: &str, data: Vec<u8>) -> Result<(), RegistryError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_creates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RegistryError::ConnectionError("connection loss".to_string()));
        }
        {
            let mut nodes = self.nodes.lock();
            if nodes.contains_key(path) {
                return Err(RegistryError::NodeExists(path.to_string()));
            }
            nodes.insert(path.to_string(), data);
        }
        self.notify_parent(path);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), RegistryError> {
        if self.nodes.lock().remove(path).is_none() {
            return Err(RegistryError::NotFound(path.to_string()));
        }
        self.notify_parent(path);
        Ok(())
    }

    async fn watch_children(&self, path: &str, listener: NodeListener) -> Result<(), RegistryError> {
        self.watchers
            .lock()
            .insert(path.to_string(), Arc::clone(&listener));
        listener(self.children(path));
        Ok(())
    }

    async fn unwatch(&self, path: &str) -> Result<(), RegistryError> {
        self.watchers.lock().remove(path);
        Ok(())
    }

    fn add_connection_listener(&self, listener: ConnectionListener) {
        self.listeners.lock().push(listener);
    }
}

// ============================================================================
// 限流
// ============================================================================

/// 计数限流器：记录调用次数，按开关决定是否放行
#[derive(Debug)]
pub struct SpyLimiter {
    pub calls: AtomicUsize,
    pub allow: AtomicBool,
}

impl SpyLimiter {
    pub fn new(allow: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            allow: AtomicBool::new(allow),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RateLimiter for SpyLimiter {
    fn type_name(&self) -> &str {
        "spy"
    }

    fn acquire(&self, _permits: u64) -> AcquireFuture<'_> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let allow = self.allow.load(Ordering::SeqCst);
        Box::pin(async move { Ok::<bool, GovernanceError>(allow) })
    }
}

/// 总是返回同一个计数限流器的工厂
pub struct SpyFactory {
    pub name: String,
    pub limiter: Arc<SpyLimiter>,
    pub created: AtomicUsize,
}

impl SpyFactory {
    pub fn new(name: &str, limiter: Arc<SpyLimiter>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            limiter,
            created: AtomicUsize::new(0),
        })
    }
}

impl RateLimiterFactory for SpyFactory {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get(
        &self,
        _key: &str,
        _policy: &RateLimitPolicy,
    ) -> Result<Arc<dyn RateLimiter>, GovernanceError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(self.limiter.clone())
    }
}
