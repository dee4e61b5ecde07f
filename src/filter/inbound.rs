//! 内置入站过滤器

use super::{InboundFilter, InboundFilterChain};
use crate::constants::{
    INBOUND_ORDER_CONCURRENCY_LIMITER, INBOUND_ORDER_LIVE_CELL, INBOUND_ORDER_LIVE_UNIT,
    INBOUND_ORDER_RATE_LIMITER, INBOUND_ORDER_READY,
};
use crate::error::{GovernanceError, Permission};
use crate::invocation::InboundInvocation;
use crate::limiter_manager::LimiterManager;
use crate::limiters::ConcurrencyLimiter;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

// ============================================================================
// 就绪检查
// ============================================================================

/// 就绪检查，进程未就绪时拒绝全部请求
#[derive(Debug, Clone)]
pub struct ReadyInboundFilter {
    ready: Arc<AtomicBool>,
}

impl ReadyInboundFilter {
    pub fn new(ready: Arc<AtomicBool>) -> Self {
        Self { ready }
    }
}

#[async_trait]
impl InboundFilter for ReadyInboundFilter {
    fn order(&self) -> i32 {
        INBOUND_ORDER_READY
    }

    fn name(&self) -> &str {
        "ready"
    }

    async fn filter(
        &self,
        invocation: &mut InboundInvocation,
        chain: &mut InboundFilterChain<'_>,
    ) -> Result<Permission, GovernanceError> {
        if !self.ready.load(Ordering::Acquire) {
            return Ok(Permission::failure("service is not ready"));
        }
        chain.filter(invocation).await
    }
}

// ============================================================================
// 并发限制
// ============================================================================

/// 并发限制
///
/// 许可挂在调用上，调用结束（`InboundInvocation` 被丢弃）时归还。
#[derive(Debug, Default)]
pub struct ConcurrencyLimitInboundFilter {
    limiters: DashMap<String, ConcurrencyLimiter>,
}

impl ConcurrencyLimitInboundFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 服务的并发控制器，上限变化时原地调整，已发出的许可继续计入
    fn limiter(&self, service: &str, max_concurrent: u64) -> ConcurrencyLimiter {
        let limiter = self
            .limiters
            .entry(service.to_string())
            .or_insert_with(|| ConcurrencyLimiter::new(max_concurrent))
            .clone();
        limiter.resize(max_concurrent);
        limiter
    }

    /// 服务当前可用许可
    pub fn available(&self, service: &str) -> Option<usize> {
        self.limiters.get(service).map(|l| l.available())
    }
}

#[async_trait]
impl InboundFilter for ConcurrencyLimitInboundFilter {
    fn order(&self) -> i32 {
        INBOUND_ORDER_CONCURRENCY_LIMITER
    }

    fn name(&self) -> &str {
        "concurrency_limiter"
    }

    async fn filter(
        &self,
        invocation: &mut InboundInvocation,
        chain: &mut InboundFilterChain<'_>,
    ) -> Result<Permission, GovernanceError> {
        if let Some(max_concurrent) = invocation.policy.concurrency_limit {
            let limiter = self.limiter(&invocation.policy.service, max_concurrent);
            match limiter.try_acquire(1) {
                Some(permit) => invocation.attach_guard(permit),
                None => {
                    debug!(
                        "Concurrency limit {} reached for {}",
                        max_concurrent, invocation.policy.service
                    );
                    return Ok(Permission::failure(format!(
                        "concurrency limit {} exceeded",
                        max_concurrent
                    )));
                }
            }
        }
        chain.filter(invocation).await
    }
}

// ============================================================================
// 限流
// ============================================================================

/// 限流，按服务策略委托给 [`LimiterManager`]
#[derive(Debug, Clone)]
pub struct RateLimitInboundFilter {
    manager: Arc<LimiterManager>,
}

impl RateLimitInboundFilter {
    pub fn new(manager: Arc<LimiterManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl InboundFilter for RateLimitInboundFilter {
    fn order(&self) -> i32 {
        INBOUND_ORDER_RATE_LIMITER
    }

    fn name(&self) -> &str {
        "rate_limiter"
    }

    async fn filter(
        &self,
        invocation: &mut InboundInvocation,
        chain: &mut InboundFilterChain<'_>,
    ) -> Result<Permission, GovernanceError> {
        let policy = Arc::clone(&invocation.policy);
        let permission = self
            .manager
            .acquire(&invocation.request, &policy.rate_limit_policies)
            .await?;
        if !permission.is_success() {
            return Ok(permission);
        }
        chain.filter(invocation).await
    }
}

// ============================================================================
// 多活
// ============================================================================

/// 请求指定的位置是否可以在本地处理
fn accessible(target: Option<&str>, local: &str, failover: bool) -> bool {
    match target {
        None => true,
        Some(target) => local.is_empty() || target == local || failover,
    }
}

/// 单元准入：请求指定了其他单元时拒绝，除非允许单元故障切换
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitInboundFilter;

#[async_trait]
impl InboundFilter for UnitInboundFilter {
    fn order(&self) -> i32 {
        INBOUND_ORDER_LIVE_UNIT
    }

    fn name(&self) -> &str {
        "live_unit"
    }

    async fn filter(
        &self,
        invocation: &mut InboundInvocation,
        chain: &mut InboundFilterChain<'_>,
    ) -> Result<Permission, GovernanceError> {
        let target = invocation.target_unit();
        let live = &invocation.live;
        if !accessible(target.as_deref(), &live.local_unit, live.unit_failover) {
            return Ok(Permission::failure(format!(
                "unit {} is not accessible in unit {}",
                target.unwrap_or_default(),
                live.local_unit
            )));
        }
        chain.filter(invocation).await
    }
}

/// 分区准入：规则同单元准入
#[derive(Debug, Default, Clone, Copy)]
pub struct CellInboundFilter;

#[async_trait]
impl InboundFilter for CellInboundFilter {
    fn order(&self) -> i32 {
        INBOUND_ORDER_LIVE_CELL
    }

    fn name(&self) -> &str {
        "live_cell"
    }

    async fn filter(
        &self,
        invocation: &mut InboundInvocation,
        chain: &mut InboundFilterChain<'_>,
    ) -> Result<Permission, GovernanceError> {
        let target = invocation.target_cell();
        let live = &invocation.live;
        if !accessible(target.as_deref(), &live.local_cell, live.unit_failover) {
            return Ok(Permission::failure(format!(
                "cell {} is not accessible in cell {}",
                target.unwrap_or_default(),
                live.local_cell
            )));
        }
        chain.filter(invocation).await
    }
}
