//! 约束组合
//!
//! 约束是 `(谓词, 数量上限, 保护函数)` 三元组。保护函数引用相同（或都为空）的约束
//! 可以合并为一次遍历：谓词取与，上限取正值中的最小值。合并结果被保护函数拒绝时，
//! 退回到逐个应用合并前的约束，结果与依次单独应用相同。

use super::{RouteFilter, RouteFilterChain};
use crate::endpoint::Endpoint;
use crate::invocation::{OutboundInvocation, RouteTarget};
use std::sync::{Arc, OnceLock};
use tracing::trace;

/// 端点谓词
pub type EndpointPredicate = Arc<dyn Fn(&dyn Endpoint) -> bool + Send + Sync>;

/// 保护函数：`(当前数量, 过滤后数量) -> 是否允许收窄`
pub type Protect = Arc<dyn Fn(usize, usize) -> bool + Send + Sync>;

fn shared_non_empty(slot: &'static OnceLock<Protect>) -> Protect {
    slot.get_or_init(|| {
        let protect: Protect = Arc::new(|_current: usize, candidates: usize| candidates > 0);
        protect
    })
    .clone()
}

/// 至少保留一个候选的保护函数
///
/// 全局共享同一个实例，使用它的约束之间都可以合并。
pub fn protect_non_empty() -> Protect {
    static PROTECT: OnceLock<Protect> = OnceLock::new();
    shared_non_empty(&PROTECT)
}

/// 多活位置约束的保护函数
///
/// 行为与 [`protect_non_empty`] 相同但实例不同，单元和分区约束只在彼此之间合并。
pub fn protect_live() -> Protect {
    static PROTECT: OnceLock<Protect> = OnceLock::new();
    shared_non_empty(&PROTECT)
}

/// 端点约束
#[derive(Clone)]
pub struct Constraint {
    predicate: EndpointPredicate,
    max_size: i64,
    protect: Option<Protect>,
    /// 合并前的约束，未合并时为空
    parts: Vec<Constraint>,
}

impl Constraint {
    /// 创建无上限、无保护的约束
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&dyn Endpoint) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
            max_size: -1,
            protect: None,
            parts: Vec::new(),
        }
    }

    /// 数量上限，非正值表示不限
    pub fn with_max_size(mut self, max_size: i64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_protect(mut self, protect: Protect) -> Self {
        self.protect = Some(protect);
        self
    }

    pub fn max_size(&self) -> i64 {
        self.max_size
    }

    pub fn protect(&self) -> Option<&Protect> {
        self.protect.as_ref()
    }

    pub fn test(&self, endpoint: &dyn Endpoint) -> bool {
        (self.predicate)(endpoint)
    }

    /// 保护函数引用相同（含都为空）时可合并
    pub fn is_composable(&self, other: &Constraint) -> bool {
        match (&self.protect, &other.protect) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// 合并了几个约束，未合并时为 1
    pub fn part_count(&self) -> usize {
        self.parts.len().max(1)
    }

    /// 合并约束，调用前须确认 [`is_composable`](Self::is_composable)
    pub fn compose(self, other: Constraint) -> Constraint {
        let left = Arc::clone(&self.predicate);
        let right = Arc::clone(&other.predicate);
        let max_size = min_size(self.max_size, other.max_size);
        let protect = self.protect.clone();
        let mut parts = self.into_parts();
        parts.extend(other.into_parts());
        Constraint {
            predicate: Arc::new(move |endpoint: &dyn Endpoint| left(endpoint) && right(endpoint)),
            max_size,
            protect,
            parts,
        }
    }

    fn into_parts(self) -> Vec<Constraint> {
        if self.parts.is_empty() {
            vec![self]
        } else {
            self.parts
        }
    }

    /// 应用到候选集合，返回候选是否被替换
    pub fn apply(&self, target: &mut RouteTarget) -> bool {
        let current = target.len();
        let mut candidates: Vec<_> = target
            .endpoints()
            .iter()
            .filter(|endpoint| self.test(&***endpoint))
            .cloned()
            .collect();

        if let Some(protect) = &self.protect {
            if !protect(current, candidates.len()) {
                if !self.parts.is_empty() {
                    trace!(
                        "Composed constraint refused, applying {} parts one by one",
                        self.parts.len()
                    );
                    let mut replaced = false;
                    for part in &self.parts {
                        replaced |= part.apply(target);
                    }
                    return replaced;
                }
                trace!(
                    "Constraint protected {} candidates from being narrowed to {}",
                    current,
                    candidates.len()
                );
                return false;
            }
        }

        if self.max_size > 0 {
            candidates.truncate(self.max_size as usize);
        }
        target.set_endpoints(candidates);
        true
    }
}

impl std::fmt::Debug for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Constraint")
            .field("max_size", &self.max_size)
            .field("protect", &self.protect.is_some())
            .field("parts", &self.part_count())
            .finish()
    }
}

fn min_size(a: i64, b: i64) -> i64 {
    match (a > 0, b > 0) {
        (true, true) => a.min(b),
        (true, false) => a,
        (false, true) => b,
        (false, false) => -1,
    }
}

/// 组合约束
///
/// 连续可合并的约束折叠为一个；遇到不可合并的约束时，当前约束落入列表并重新开始。
#[derive(Debug, Default)]
pub struct CompositeConstraint {
    active: Option<Constraint>,
    flushed: Vec<Constraint>,
}

impl CompositeConstraint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, constraint: Constraint) {
        self.active = Some(match self.active.take() {
            None => constraint,
            Some(active) if active.is_composable(&constraint) => active.compose(constraint),
            Some(active) => {
                self.flushed.push(active);
                constraint
            }
        });
    }

    /// 需要的遍历次数
    pub fn len(&self) -> usize {
        self.flushed.len() + usize::from(self.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }

    /// 按加入顺序依次应用
    pub fn apply(&self, target: &mut RouteTarget) {
        for constraint in self.flushed.iter().chain(self.active.iter()) {
            constraint.apply(target);
        }
    }
}

/// 约束路由过滤器
pub trait ConstraintRouteFilter: RouteFilter {
    /// 计算本次调用的约束，`None` 表示不收窄
    fn constraint(&self, invocation: &OutboundInvocation) -> Option<Constraint>;

    /// 单独执行时的默认行为：应用约束后继续链
    fn apply_and_continue(&self, invocation: &mut OutboundInvocation, chain: &mut RouteFilterChain<'_>) {
        if let Some(constraint) = self.constraint(invocation) {
            constraint.apply(&mut invocation.target);
        }
        chain.filter(invocation);
    }
}

/// 合并后的约束过滤器
///
/// 由相邻的约束过滤器合并而来，一次调用计算全部约束并按最少遍历次数应用。
pub struct CompositeConstraintRouteFilter {
    filters: Vec<Arc<dyn RouteFilter>>,
    order: i32,
    name: String,
}

impl CompositeConstraintRouteFilter {
    fn new(filters: Vec<Arc<dyn RouteFilter>>) -> Self {
        let order = filters.first().map(|f| f.order()).unwrap_or_default();
        let name = filters
            .iter()
            .map(|f| f.name())
            .collect::<Vec<_>>()
            .join("+");
        Self {
            filters,
            order,
            name,
        }
    }

    /// 被合并的过滤器
    pub fn filters(&self) -> &[Arc<dyn RouteFilter>] {
        &self.filters
    }

    /// 收集本次调用的约束
    pub fn constraints(&self, invocation: &OutboundInvocation) -> CompositeConstraint {
        let mut composite = CompositeConstraint::new();
        for filter in &self.filters {
            if let Some(constraint) = filter
                .as_constraint()
                .and_then(|c| c.constraint(invocation))
            {
                composite.add(constraint);
            }
        }
        composite
    }

    /// 合并相邻的约束过滤器
    ///
    /// 单次扫描，只合并连续出现且数量不少于 2 的约束过滤器，其余过滤器和相对顺序不变。
    pub fn compose(filters: Vec<Arc<dyn RouteFilter>>) -> Vec<Arc<dyn RouteFilter>> {
        let mut result: Vec<Arc<dyn RouteFilter>> = Vec::with_capacity(filters.len());
        let mut run: Vec<Arc<dyn RouteFilter>> = Vec::new();

        for filter in filters {
            if filter.as_constraint().is_some() {
                run.push(filter);
            } else {
                Self::flush(&mut run, &mut result);
                result.push(filter);
            }
        }
        Self::flush(&mut run, &mut result);
        result
    }

    fn flush(run: &mut Vec<Arc<dyn RouteFilter>>, result: &mut Vec<Arc<dyn RouteFilter>>) {
        if run.len() >= 2 {
            let composite = Self::new(std::mem::take(run));
            trace!("Composed constraint filters: {}", composite.name);
            result.push(Arc::new(composite));
        } else {
            result.append(run);
        }
    }
}

impl RouteFilter for CompositeConstraintRouteFilter {
    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn filter(&self, invocation: &mut OutboundInvocation, chain: &mut RouteFilterChain<'_>) {
        let composite = self.constraints(invocation);
        composite.apply(&mut invocation.target);
        chain.filter(invocation);
    }
}
