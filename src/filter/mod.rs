//! Copyright (c) 2026, Kirky.X
//!
//! Apache License 2.0
//!
//! 过滤链模块
//!
//! 使用责任链模式组织入站准入检查和出站路由。
//!
//! # 特性
//!
//! - 有序执行：过滤器按 `order()` 升序执行，顺序值之间留有间隔供自定义过滤器插入
//! - 游标推进：链自身记录游标，每个过滤器在一次遍历中至多执行一次
//! - 短路：过滤器不调用 `chain.filter` 即结束整条链
//! - 约束合并：相邻的约束过滤器合并为一次遍历，见 [`constraint`]
//!
//! 链对象持有可变游标，不能在并发调用之间共享，每次调用都要新建。

pub mod constraint;
pub mod inbound;
pub mod route;

pub use constraint::{
    protect_live, protect_non_empty, CompositeConstraint, CompositeConstraintRouteFilter, Constraint,
    ConstraintRouteFilter, EndpointPredicate, Protect,
};

use crate::error::{GovernanceError, Permission};
use crate::invocation::{InboundInvocation, OutboundInvocation};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, trace};

// ============================================================================
// 入站过滤
// ============================================================================

/// 入站过滤器
///
/// 过滤器要么返回结果结束整条链，要么调用一次 `chain.filter(invocation)` 继续。
#[async_trait]
pub trait InboundFilter: Send + Sync {
    /// 执行顺序，越小越先执行
    fn order(&self) -> i32;

    fn name(&self) -> &str;

    async fn filter(
        &self,
        invocation: &mut InboundInvocation,
        chain: &mut InboundFilterChain<'_>,
    ) -> Result<Permission, GovernanceError>;
}

/// 入站过滤链
///
/// 每次调用新建，游标不可在调用之间共享。
pub struct InboundFilterChain<'a> {
    filters: &'a [Arc<dyn InboundFilter>],
    index: usize,
}

impl<'a> InboundFilterChain<'a> {
    pub fn new(filters: &'a [Arc<dyn InboundFilter>]) -> Self {
        Self { filters, index: 0 }
    }

    /// 执行下一个过滤器，链已走完时返回允许
    pub fn filter<'b>(
        &'b mut self,
        invocation: &'b mut InboundInvocation,
    ) -> BoxFuture<'b, Result<Permission, GovernanceError>> {
        Box::pin(async move {
            let filters = self.filters;
            match filters.get(self.index) {
                Some(filter) => {
                    self.index += 1;
                    trace!("Inbound filter {} (order {})", filter.name(), filter.order());
                    filter.filter(invocation, self).await
                }
                None => Ok(Permission::success()),
            }
        })
    }

    /// 已执行的过滤器数量
    pub fn position(&self) -> usize {
        self.index
    }
}

/// 排序后的入站过滤器集合
#[derive(Clone, Default)]
pub struct InboundFilters {
    filters: Vec<Arc<dyn InboundFilter>>,
}

impl InboundFilters {
    /// 创建过滤器集合，按顺序值稳定排序
    pub fn new(mut filters: Vec<Arc<dyn InboundFilter>>) -> Self {
        filters.sort_by_key(|f| f.order());
        Self { filters }
    }

    /// 新建一条链
    pub fn chain(&self) -> InboundFilterChain<'_> {
        InboundFilterChain::new(&self.filters)
    }

    /// 执行入站过滤
    pub async fn execute(
        &self,
        invocation: &mut InboundInvocation,
    ) -> Result<Permission, GovernanceError> {
        let mut chain = self.chain();
        let permission = chain.filter(invocation).await?;
        if let Permission::Failure(reason) = &permission {
            debug!(
                "Inbound request to {} rejected after {} filters: {}",
                invocation.request.service,
                chain.position(),
                reason
            );
        }
        Ok(permission)
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

// ============================================================================
// 路由过滤
// ============================================================================

/// 路由过滤器
///
/// 收窄 `invocation.target` 后调用 `chain.filter(invocation)` 继续。
pub trait RouteFilter: Send + Sync {
    /// 执行顺序，越小越先执行
    fn order(&self) -> i32;

    fn name(&self) -> &str;

    fn filter(&self, invocation: &mut OutboundInvocation, chain: &mut RouteFilterChain<'_>);

    /// 约束过滤器返回自身，用于相邻约束合并
    fn as_constraint(&self) -> Option<&dyn ConstraintRouteFilter> {
        None
    }
}

/// 路由过滤链
///
/// 候选为空时终止，后续过滤器不再执行。
pub struct RouteFilterChain<'a> {
    filters: &'a [Arc<dyn RouteFilter>],
    index: usize,
}

impl<'a> RouteFilterChain<'a> {
    pub fn new(filters: &'a [Arc<dyn RouteFilter>]) -> Self {
        Self { filters, index: 0 }
    }

    /// 执行下一个过滤器
    pub fn filter(&mut self, invocation: &mut OutboundInvocation) {
        let filters = self.filters;
        if self.index >= filters.len() {
            return;
        }
        if invocation.target.is_empty() {
            debug!(
                "No candidate left for {}, route chain stopped at {}",
                invocation.request.service, self.index
            );
            self.index = filters.len();
            return;
        }

        let filter = &filters[self.index];
        self.index += 1;
        trace!(
            "Route filter {} (order {}), candidates: {}",
            filter.name(),
            filter.order(),
            invocation.target.len()
        );
        filter.filter(invocation, self);
    }

    /// 已执行的过滤器数量
    pub fn position(&self) -> usize {
        self.index
    }
}

/// 排序并合并后的路由过滤器集合
#[derive(Clone, Default)]
pub struct RouteFilters {
    filters: Vec<Arc<dyn RouteFilter>>,
}

impl RouteFilters {
    /// 创建过滤器集合：按顺序值稳定排序，再合并相邻约束过滤器
    pub fn new(mut filters: Vec<Arc<dyn RouteFilter>>) -> Self {
        filters.sort_by_key(|f| f.order());
        Self {
            filters: CompositeConstraintRouteFilter::compose(filters),
        }
    }

    /// 新建一条链
    pub fn chain(&self) -> RouteFilterChain<'_> {
        RouteFilterChain::new(&self.filters)
    }

    /// 执行路由过滤
    pub fn execute(&self, invocation: &mut OutboundInvocation) {
        self.chain().filter(invocation);
    }

    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

// ============================================================================
// 单元测试
// ============================================================================
