//! 请求与调用上下文
//!
//! 入站调用（[`InboundInvocation`]）经过入站过滤链做准入检查；
//! 出站调用（[`OutboundInvocation`]）携带候选端点集合 [`RouteTarget`] 经过路由过滤链。

use crate::config::LiveConfig;
use crate::constants::{HEADER_LANE, HEADER_LIVE_CELL, HEADER_LIVE_UNIT, HEADER_STICKY_ID};
use crate::cookie::{Cookies, HttpMethod};
use crate::endpoint::{EndpointGroup, SharedEndpoint};
use crate::policy::ServicePolicy;
use crate::registry::ServiceId;
use ahash::AHashMap as HashMap;
use std::any::Any;
use std::sync::Arc;

// ============================================================================
// 服务请求
// ============================================================================

/// 服务请求
///
/// 与具体框架无关的请求表示，头部名统一为小写。
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    /// 目标服务
    pub service: ServiceId,
    /// 请求路径
    pub path: String,
    /// 请求方法
    pub method: HttpMethod,
    /// 请求头
    pub headers: HashMap<String, String>,
    /// 客户端地址
    pub client_ip: Option<String>,
}

impl ServiceRequest {
    /// 创建请求
    pub fn new(service: ServiceId) -> Self {
        Self {
            service,
            path: "/".to_string(),
            method: HttpMethod::Get,
            headers: HashMap::new(),
            client_ip: None,
        }
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    /// 添加请求头
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    pub fn with_client_ip(mut self, ip: &str) -> Self {
        self.client_ip = Some(ip.to_string());
        self
    }

    /// 获取请求头（大小写不敏感）
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(String::as_str)
    }

    /// 获取 cookie
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.header("cookie").and_then(|h| Cookies::get(h, name))
    }

    /// 读取路由标记：优先请求头，其次同名 cookie
    fn tag(&self, header: &str) -> Option<String> {
        self.header(header)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| self.cookie(header).filter(|v| !v.is_empty()))
    }
}

// ============================================================================
// 入站调用
// ============================================================================

/// 入站调用
pub struct InboundInvocation {
    pub request: ServiceRequest,
    pub policy: Arc<ServicePolicy>,
    pub live: Arc<LiveConfig>,
    /// 请求生命周期内持有的资源（如并发许可），调用结束随之释放
    guards: Vec<Box<dyn Any + Send>>,
}

impl InboundInvocation {
    pub fn new(request: ServiceRequest, policy: Arc<ServicePolicy>, live: Arc<LiveConfig>) -> Self {
        Self {
            request,
            policy,
            live,
            guards: Vec::new(),
        }
    }

    /// 请求指定的单元
    pub fn target_unit(&self) -> Option<String> {
        self.request.tag(HEADER_LIVE_UNIT)
    }

    /// 请求指定的分区
    pub fn target_cell(&self) -> Option<String> {
        self.request.tag(HEADER_LIVE_CELL)
    }

    /// 持有资源直到调用结束
    pub fn attach_guard<G: Any + Send>(&mut self, guard: G) {
        self.guards.push(Box::new(guard));
    }

    pub fn guard_count(&self) -> usize {
        self.guards.len()
    }
}

impl std::fmt::Debug for InboundInvocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundInvocation")
            .field("request", &self.request)
            .field("service", &self.policy.service)
            .field("guards", &self.guards.len())
            .finish()
    }
}

// ============================================================================
// 路由目标
// ============================================================================

/// 路由目标
///
/// 候选端点集合，路由过滤器逐步收窄。
#[derive(Debug, Clone)]
pub struct RouteTarget {
    group: Arc<EndpointGroup>,
    endpoints: Vec<SharedEndpoint>,
    unit: Option<String>,
    cell: Option<String>,
}

impl RouteTarget {
    /// 以分组全部端点作为初始候选
    pub fn new(group: Arc<EndpointGroup>) -> Self {
        let endpoints = group.endpoints().to_vec();
        Self {
            group,
            endpoints,
            unit: None,
            cell: None,
        }
    }

    /// 端点所属分组快照
    pub fn group(&self) -> &EndpointGroup {
        &self.group
    }

    pub fn endpoints(&self) -> &[SharedEndpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// 替换候选集合
    pub fn set_endpoints(&mut self, endpoints: Vec<SharedEndpoint>) {
        self.endpoints = endpoints;
    }

    /// 原地保留满足条件的端点
    pub fn retain<F>(&mut self, predicate: F)
    where
        F: FnMut(&SharedEndpoint) -> bool,
    {
        self.endpoints.retain(predicate);
    }

    /// 收窄为单个端点
    pub fn choose(&mut self, endpoint: SharedEndpoint) {
        self.endpoints = vec![endpoint];
    }

    /// 清空候选
    pub fn clear(&mut self) {
        self.endpoints.clear();
    }

    pub fn first(&self) -> Option<&SharedEndpoint> {
        self.endpoints.first()
    }

    /// 已选定的单元
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn set_unit(&mut self, unit: impl Into<String>) {
        self.unit = Some(unit.into());
    }

    /// 已选定的分区
    pub fn cell(&self) -> Option<&str> {
        self.cell.as_deref()
    }

    pub fn set_cell(&mut self, cell: impl Into<String>) {
        self.cell = Some(cell.into());
    }
}

// ============================================================================
// 出站调用
// ============================================================================

/// 出站调用
#[derive(Debug)]
pub struct OutboundInvocation {
    pub request: ServiceRequest,
    pub policy: Arc<ServicePolicy>,
    pub live: Arc<LiveConfig>,
    pub target: RouteTarget,
    /// 本次调用的时间快照（毫秒），用于预热权重计算
    pub now: i64,
}

impl OutboundInvocation {
    pub fn new(
        request: ServiceRequest,
        policy: Arc<ServicePolicy>,
        live: Arc<LiveConfig>,
        group: Arc<EndpointGroup>,
    ) -> Self {
        Self {
            request,
            policy,
            live,
            target: RouteTarget::new(group),
            now: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// 固定时间快照
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    /// 期望路由到的单元：请求指定，否则本地单元
    pub fn preferred_unit(&self) -> String {
        self.request
            .tag(HEADER_LIVE_UNIT)
            .unwrap_or_else(|| self.live.local_unit.clone())
    }

    /// 期望路由到的分区：请求指定，否则本地分区
    pub fn preferred_cell(&self) -> String {
        self.request
            .tag(HEADER_LIVE_CELL)
            .unwrap_or_else(|| self.live.local_cell.clone())
    }

    /// 请求所属泳道：请求指定，否则本地泳道
    pub fn lane(&self) -> String {
        self.request
            .tag(HEADER_LANE)
            .unwrap_or_else(|| self.live.local_lane.clone())
    }

    /// 粘滞端点ID
    pub fn sticky_id(&self) -> Option<String> {
        self.request.tag(HEADER_STICKY_ID)
    }

    /// 权重系数
    pub fn weight_ratio(&self) -> Option<f64> {
        self.policy.weight_ratio
    }
}
