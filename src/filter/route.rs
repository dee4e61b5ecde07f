//! 内置路由过滤器
//!
//! 熔断、粘滞、健康、单元、分区过滤器都是约束过滤器，相邻时合并执行：熔断、粘滞、
//! 健康共用一个保护函数，单元、分区共用另一个，因此合并后是两次遍历。
//! 泳道、负载均衡和实例熔断按顺序单独执行。

use super::constraint::{protect_live, protect_non_empty, Constraint, ConstraintRouteFilter};
use super::{RouteFilter, RouteFilterChain};
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::constants::{
    ROUTE_ORDER_CIRCUIT_BREAKER, ROUTE_ORDER_HEALTH, ROUTE_ORDER_INSTANCE_CIRCUIT_BREAKER,
    ROUTE_ORDER_LANE, ROUTE_ORDER_LIVE_CELL, ROUTE_ORDER_LIVE_UNIT, ROUTE_ORDER_LOADBALANCE,
    ROUTE_ORDER_STICKY,
};
use crate::endpoint::{Endpoint, Labeled, Locatable, Stateful};
use crate::invocation::OutboundInvocation;
use crate::loadbalance::{load_balancer, LoadBalancer};
use crate::policy::LoadBalancerKind;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// 为约束过滤器实现 `RouteFilter`
macro_rules! constraint_route_filter {
    ($filter:ty, $order:expr, $name:expr) => {
        impl RouteFilter for $filter {
            fn order(&self) -> i32 {
                $order
            }

            fn name(&self) -> &str {
                $name
            }

            fn filter(&self, invocation: &mut OutboundInvocation, chain: &mut RouteFilterChain<'_>) {
                self.apply_and_continue(invocation, chain);
            }

            fn as_constraint(&self) -> Option<&dyn ConstraintRouteFilter> {
                Some(self)
            }
        }
    };
}

// ============================================================================
// 熔断
// ============================================================================

/// 剔除熔断打开的端点，全部熔断时保留原候选
#[derive(Debug, Clone)]
pub struct CircuitBreakerRouteFilter {
    breakers: Arc<CircuitBreakerRegistry>,
}

impl CircuitBreakerRouteFilter {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breakers }
    }
}

impl ConstraintRouteFilter for CircuitBreakerRouteFilter {
    fn constraint(&self, _invocation: &OutboundInvocation) -> Option<Constraint> {
        if self.breakers.is_empty() {
            return None;
        }
        let breakers = Arc::clone(&self.breakers);
        Some(
            Constraint::new(move |e: &dyn Endpoint| breakers.is_available(e.id()))
                .with_protect(protect_non_empty()),
        )
    }
}

constraint_route_filter!(CircuitBreakerRouteFilter, ROUTE_ORDER_CIRCUIT_BREAKER, "circuit_breaker");

// ============================================================================
// 粘滞
// ============================================================================

/// 粘滞路由：服务开启粘滞且请求携带端点ID时，优先选中该端点
#[derive(Debug, Default, Clone, Copy)]
pub struct StickyRouteFilter;

impl ConstraintRouteFilter for StickyRouteFilter {
    fn constraint(&self, invocation: &OutboundInvocation) -> Option<Constraint> {
        if !invocation.policy.sticky {
            return None;
        }
        let sticky_id = invocation.sticky_id()?;
        Some(
            Constraint::new(move |e: &dyn Endpoint| e.id() == sticky_id)
                .with_max_size(1)
                .with_protect(protect_non_empty()),
        )
    }
}

constraint_route_filter!(StickyRouteFilter, ROUTE_ORDER_STICKY, "sticky");

// ============================================================================
// 健康
// ============================================================================

/// 只保留可访问状态的端点
#[derive(Debug, Default, Clone, Copy)]
pub struct HealthyRouteFilter;

impl ConstraintRouteFilter for HealthyRouteFilter {
    fn constraint(&self, _invocation: &OutboundInvocation) -> Option<Constraint> {
        Some(
            Constraint::new(|e: &dyn Endpoint| e.is_accessible()).with_protect(protect_non_empty()),
        )
    }
}

constraint_route_filter!(HealthyRouteFilter, ROUTE_ORDER_HEALTH, "healthy");

// ============================================================================
// 多活
// ============================================================================

/// 单元路由：优先请求指定或本地所在单元，单元内无端点时不收窄
#[derive(Debug, Default, Clone, Copy)]
pub struct UnitRouteFilter;

impl ConstraintRouteFilter for UnitRouteFilter {
    fn constraint(&self, invocation: &OutboundInvocation) -> Option<Constraint> {
        let unit = invocation.preferred_unit();
        if unit.is_empty() || invocation.target.group().get_unit_group(&unit).is_none() {
            return None;
        }
        Some(
            Constraint::new(move |e: &dyn Endpoint| e.unit() == unit)
                .with_protect(protect_live()),
        )
    }
}

constraint_route_filter!(UnitRouteFilter, ROUTE_ORDER_LIVE_UNIT, "live_unit");

/// 分区路由：优先请求指定或本地所在分区
///
/// 目标单元存在时只在该单元内查找分区，否则在全部单元中查找；找不到时不收窄。
#[derive(Debug, Default, Clone, Copy)]
pub struct CellRouteFilter;

impl ConstraintRouteFilter for CellRouteFilter {
    fn constraint(&self, invocation: &OutboundInvocation) -> Option<Constraint> {
        let cell = invocation.preferred_cell();
        if cell.is_empty() {
            return None;
        }
        let group = invocation.target.group();
        let present = match group.get_unit_group(&invocation.preferred_unit()) {
            Some(unit_group) => unit_group.get_cell(&cell).is_some(),
            None => group.unit_groups().any(|u| u.get_cell(&cell).is_some()),
        };
        if !present {
            return None;
        }
        Some(
            Constraint::new(move |e: &dyn Endpoint| e.cell() == cell)
                .with_protect(protect_live()),
        )
    }
}

constraint_route_filter!(CellRouteFilter, ROUTE_ORDER_LIVE_CELL, "live_cell");

// ============================================================================
// 泳道
// ============================================================================

/// 泳道路由
///
/// 优先同泳道端点，其次基准泳道（无泳道标签）端点；两者都没有时清空候选。
#[derive(Debug, Default, Clone, Copy)]
pub struct LaneRouteFilter;

impl RouteFilter for LaneRouteFilter {
    fn order(&self) -> i32 {
        ROUTE_ORDER_LANE
    }

    fn name(&self) -> &str {
        "lane"
    }

    fn filter(&self, invocation: &mut OutboundInvocation, chain: &mut RouteFilterChain<'_>) {
        let lane = invocation.lane();
        if !lane.is_empty() {
            let target = &mut invocation.target;
            if target.endpoints().iter().any(|e| e.lane() == lane) {
                target.retain(|e| e.lane() == lane);
            } else {
                target.retain(|e| e.lane().is_empty());
                if target.is_empty() {
                    debug!("No endpoint in lane {} or base lane", lane);
                }
            }
        }
        chain.filter(invocation);
    }
}

// ============================================================================
// 负载均衡
// ============================================================================

/// 负载均衡，按服务策略选择算法，选中后候选只剩一个
///
/// 每种算法的均衡器按需创建一次，轮询计数在调用之间保留
#[derive(Default)]
pub struct LoadBalanceRouteFilter {
    balancers: DashMap<LoadBalancerKind, Arc<dyn LoadBalancer>>,
}

impl LoadBalanceRouteFilter {
    pub fn new() -> Self {
        Self::default()
    }

    fn balancer(&self, kind: LoadBalancerKind) -> Arc<dyn LoadBalancer> {
        self.balancers
            .entry(kind)
            .or_insert_with(|| load_balancer(kind))
            .clone()
    }
}

impl std::fmt::Debug for LoadBalanceRouteFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<LoadBalancerKind> = self.balancers.iter().map(|e| *e.key()).collect();
        f.debug_struct("LoadBalanceRouteFilter")
            .field("balancers", &kinds)
            .finish()
    }
}

impl RouteFilter for LoadBalanceRouteFilter {
    fn order(&self) -> i32 {
        ROUTE_ORDER_LOADBALANCE
    }

    fn name(&self) -> &str {
        "loadbalance"
    }

    fn filter(&self, invocation: &mut OutboundInvocation, chain: &mut RouteFilterChain<'_>) {
        let balancer = self.balancer(invocation.policy.load_balancer);
        match balancer.choose(invocation.target.endpoints(), invocation) {
            Some(endpoint) => {
                let unit = endpoint.unit().to_string();
                let cell = endpoint.cell().to_string();
                invocation.target.choose(endpoint);
                invocation.target.set_unit(unit);
                invocation.target.set_cell(cell);
            }
            None => invocation.target.clear(),
        }
        chain.filter(invocation);
    }
}

// ============================================================================
// 实例熔断
// ============================================================================

/// 为选中的端点申请熔断器调用名额，被拒绝时清空候选
#[derive(Debug, Clone)]
pub struct InstanceCircuitBreakerRouteFilter {
    breakers: Arc<CircuitBreakerRegistry>,
}

impl InstanceCircuitBreakerRouteFilter {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self { breakers }
    }
}

impl RouteFilter for InstanceCircuitBreakerRouteFilter {
    fn order(&self) -> i32 {
        ROUTE_ORDER_INSTANCE_CIRCUIT_BREAKER
    }

    fn name(&self) -> &str {
        "instance_circuit_breaker"
    }

    fn filter(&self, invocation: &mut OutboundInvocation, chain: &mut RouteFilterChain<'_>) {
        if let Some(endpoint) = invocation.target.first() {
            if !self.breakers.try_acquire(endpoint.id()) {
                debug!("Circuit breaker of {} is open", endpoint.id());
                invocation.target.clear();
            }
        }
        chain.filter(invocation);
    }
}

/// 默认路由过滤器
pub fn default_route_filters(breakers: Arc<CircuitBreakerRegistry>) -> Vec<Arc<dyn RouteFilter>> {
    vec![
        Arc::new(CircuitBreakerRouteFilter::new(Arc::clone(&breakers))) as Arc<dyn RouteFilter>,
        Arc::new(StickyRouteFilter),
        Arc::new(HealthyRouteFilter),
        Arc::new(UnitRouteFilter),
        Arc::new(CellRouteFilter),
        Arc::new(LaneRouteFilter),
        Arc::new(LoadBalanceRouteFilter::new()),
        Arc::new(InstanceCircuitBreakerRouteFilter::new(breakers)),
    ]
}
