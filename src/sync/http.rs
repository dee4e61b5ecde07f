//! HTTP 轮询监视器
//!
//! 后台任务每个周期（间隔加随机抖动）对每个订阅发起一次 GET：
//!
//! - 200：解析响应，成功则版本前进并发出 UPDATE
//! - 404：发出 DELETE
//! - 304：无事件
//! - 其他状态、网络错误、超时或解析失败：发出 ERROR，版本不变
//!
//! 状态机：STOPPED -> `start()` -> RUNNING -> `close()` -> STOPPED

use super::{
    ApiResponse, JsonParser, ObjectParser, SyncEvent, SyncEventKind, SyncKey, SyncListener,
    SyncResponse, SyncStatus,
};
use crate::config::WatcherConfig;
use crate::constants::{TEMPLATE_SPACE_ID, TEMPLATE_SPACE_VERSION};
use crate::error::GovernanceError;
use crate::template::Template;
use ahash::AHashMap as HashMap;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, trace, warn};

// ============================================================================
// HTTP 抽象
// ============================================================================

/// HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP GET 原语
#[async_trait]
pub trait HttpFetcher: Send + Sync + 'static {
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpResponse, GovernanceError>;
}

/// 基于 reqwest 的实现，透明解压 gzip/deflate
#[cfg(feature = "http")]
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl ReqwestFetcher {
    pub fn new() -> Result<Self, GovernanceError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .deflate(true)
            .build()
            .map_err(|e| GovernanceError::HttpError(format!("创建HTTP客户端失败: {}", e)))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpResponse, GovernanceError> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request
            .send()
            .await
            .map_err(|e| GovernanceError::HttpError(format!("请求 {} 失败: {}", url, e)))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| GovernanceError::HttpError(format!("读取 {} 响应失败: {}", url, e)))?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

// ============================================================================
// 订阅
// ============================================================================

/// 可被监视器轮询的订阅
#[async_trait]
pub trait Watchable: Send + Sync {
    fn key(&self) -> &SyncKey;

    /// 当前版本
    fn version(&self) -> u64;

    /// 执行一次拉取，同一订阅同时只有一次拉取，重入时返回 `None`
    async fn poll(
        &self,
        fetcher: &dyn HttpFetcher,
        context: &HashMap<String, String>,
        config: &WatcherConfig,
    ) -> Option<SyncStatus>;
}

/// 按类型解析的 HTTP 订阅
pub struct HttpSubscription<T, P = JsonParser> {
    key: SyncKey,
    url: Template,
    parser: P,
    version: AtomicU64,
    in_flight: AtomicBool,
    listener: SyncListener<T>,
}

impl<T> HttpSubscription<T, JsonParser>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(key: SyncKey, url: impl Into<Template>, listener: SyncListener<T>) -> Self {
        Self::with_parser(key, url, JsonParser, listener)
    }
}

impl<T, P> HttpSubscription<T, P>
where
    T: DeserializeOwned + Send + Sync + 'static,
    P: ObjectParser,
{
    pub fn with_parser(
        key: SyncKey,
        url: impl Into<Template>,
        parser: P,
        listener: SyncListener<T>,
    ) -> Self {
        Self {
            key,
            url: url.into(),
            parser,
            version: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            listener,
        }
    }

    /// 渲染本次请求地址
    pub fn url(&self, context: &HashMap<String, String>) -> String {
        let mut context = context.clone();
        context.insert(TEMPLATE_SPACE_VERSION.to_string(), self.version().to_string());
        self.url.render(&context)
    }

    /// 解释响应
    pub fn interpret(&self, response: HttpResponse) -> SyncResponse<T> {
        match response.status {
            200 => match self.parser.parse::<ApiResponse<T>>(&response.body) {
                Ok(api) => api.into_sync_response(),
                Err(e) => SyncResponse::error(format!("invalid response: {}", e)),
            },
            304 => SyncResponse::not_modified(),
            404 => SyncResponse::not_found(),
            status => SyncResponse::error(format!("unexpected http status {}", status)),
        }
    }

    /// 应用拉取结果，通知监听器并返回状态
    ///
    /// 版本规则：服务端版本大于当前版本时采用服务端版本，否则当前版本加一。
    pub fn apply(&self, response: SyncResponse<T>) -> SyncStatus {
        let status = response.status;
        let current = self.version();
        let event = match status {
            SyncStatus::Success => {
                let next = match response.version {
                    Some(server) if server > current => server,
                    _ => current + 1,
                };
                self.version.store(next, Ordering::Release);
                debug!("Subscription {} updated to version {}", self.key, next);
                Some(self.event(SyncEventKind::Update, response.data, next, None))
            }
            SyncStatus::NotFound => Some(self.event(
                SyncEventKind::Delete,
                None,
                current,
                response.error,
            )),
            SyncStatus::Error => {
                warn!(
                    "Subscription {} sync failed: {}",
                    self.key,
                    response.error.as_deref().unwrap_or("unknown")
                );
                Some(self.event(SyncEventKind::Error, None, current, response.error))
            }
            SyncStatus::NotModified => None,
        };
        if let Some(event) = event {
            (self.listener)(event);
        }
        status
    }

    fn event(
        &self,
        kind: SyncEventKind,
        data: Option<T>,
        version: u64,
        error: Option<String>,
    ) -> SyncEvent<T> {
        SyncEvent {
            key: self.key.clone(),
            kind,
            data,
            version,
            error,
        }
    }
}

/// 拉取期间占用订阅，结束时释放
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[async_trait]
impl<T, P> Watchable for HttpSubscription<T, P>
where
    T: DeserializeOwned + Send + Sync + 'static,
    P: ObjectParser,
{
    fn key(&self) -> &SyncKey {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    async fn poll(
        &self,
        fetcher: &dyn HttpFetcher,
        context: &HashMap<String, String>,
        config: &WatcherConfig,
    ) -> Option<SyncStatus> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!("Subscription {} is already being fetched", self.key);
            return None;
        }
        let _guard = InFlight(&self.in_flight);

        let url = self.url(context);
        let timeout = config.timeout();
        let response = match tokio::time::timeout(timeout, fetcher.get(&url, &config.headers, timeout)).await
        {
            Ok(Ok(response)) => self.interpret(response),
            Ok(Err(e)) => SyncResponse::error(e.to_string()),
            Err(_) => SyncResponse::error(format!("request timed out after {:?}", timeout)),
        };
        Some(self.apply(response))
    }
}

// ============================================================================
// 监视器
// ============================================================================

struct WatcherInner {
    config: WatcherConfig,
    fetcher: Arc<dyn HttpFetcher>,
    subscriptions: DashMap<SyncKey, Arc<dyn Watchable>>,
    context: RwLock<HashMap<String, String>>,
    started: AtomicBool,
    notify: Notify,
}

impl WatcherInner {
    async fn poll_once(&self) -> usize {
        let subscriptions: Vec<Arc<dyn Watchable>> = self
            .subscriptions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        let context = self.context.read().clone();

        let mut polled = 0;
        for subscription in subscriptions {
            if subscription
                .poll(self.fetcher.as_ref(), &context, &self.config)
                .await
                .is_some()
            {
                polled += 1;
            }
        }
        polled
    }

    fn next_delay(&self) -> Duration {
        let jitter = if self.config.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.config.jitter_ms)
        } else {
            0
        };
        self.config.interval() + Duration::from_millis(jitter)
    }

    async fn run(self: Arc<Self>) {
        info!("HTTP watcher started, interval {:?}", self.config.interval());
        while self.started.load(Ordering::Acquire) {
            self.poll_once().await;
            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.notify.notified() => {}
            }
        }
        info!("HTTP watcher stopped");
    }
}

/// HTTP 轮询监视器
#[derive(Clone)]
pub struct HttpWatcher {
    inner: Arc<WatcherInner>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl HttpWatcher {
    pub fn new(config: WatcherConfig, fetcher: Arc<dyn HttpFetcher>) -> Self {
        Self {
            inner: Arc::new(WatcherInner {
                config,
                fetcher,
                subscriptions: DashMap::new(),
                context: RwLock::new(HashMap::new()),
                started: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// 设置多活空间，渲染到 `{space_id}`
    pub fn with_space_id(self, space_id: &str) -> Self {
        self.set_context(TEMPLATE_SPACE_ID, space_id);
        self
    }

    pub fn set_context(&self, key: &str, value: &str) {
        self.inner
            .context
            .write()
            .insert(key.to_string(), value.to_string());
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.inner.config
    }

    /// 添加订阅，同键订阅被替换
    pub fn subscribe(&self, subscription: Arc<dyn Watchable>) {
        debug!("Subscribed {}", subscription.key());
        self.inner
            .subscriptions
            .insert(subscription.key().clone(), subscription);
    }

    pub fn unsubscribe(&self, key: &SyncKey) -> bool {
        self.inner.subscriptions.remove(key).is_some()
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// 订阅当前版本
    pub fn version(&self, key: &SyncKey) -> Option<u64> {
        self.inner.subscriptions.get(key).map(|s| s.version())
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    /// 启动后台轮询
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<(), GovernanceError> {
        if self
            .inner
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GovernanceError::SyncError("HTTP监视器已在运行".to_string()));
        }
        let handle = tokio::spawn(Arc::clone(&self.inner).run());
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// 停止后台轮询并等待任务退出
    #[instrument(skip(self))]
    pub async fn close(&self) {
        if !self.inner.started.swap(false, Ordering::AcqRel) {
            return;
        }
        self.inner.notify.notify_one();
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("HTTP watcher task ended abnormally: {}", e);
            }
        }
    }

    /// 执行一轮拉取，返回实际拉取的订阅数
    pub async fn poll_once(&self) -> usize {
        self.inner.poll_once().await
    }
}

impl std::fmt::Debug for HttpWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpWatcher")
            .field("config", &self.inner.config)
            .field("subscriptions", &self.inner.subscriptions.len())
            .field("started", &self.is_started())
            .finish()
    }
}
