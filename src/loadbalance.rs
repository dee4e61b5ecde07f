//! 负载均衡
//!
//! 从路由过滤后的候选端点中选出一个。权重取端点的有效权重（含预热和权重系数）。

use crate::endpoint::SharedEndpoint;
use crate::invocation::OutboundInvocation;
use crate::policy::LoadBalancerKind;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 负载均衡器
pub trait LoadBalancer: Send + Sync {
    fn name(&self) -> &str;

    /// 选择端点，候选为空返回 `None`
    fn choose(
        &self,
        endpoints: &[SharedEndpoint],
        invocation: &OutboundInvocation,
    ) -> Option<SharedEndpoint>;
}

/// 按配置创建负载均衡器
pub fn load_balancer(kind: LoadBalancerKind) -> Arc<dyn LoadBalancer> {
    match kind {
        LoadBalancerKind::RandomWeight => Arc::new(RandomWeightLoadBalancer),
        LoadBalancerKind::RoundRobin => Arc::new(RoundRobinLoadBalancer::default()),
    }
}

/// 加权随机
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomWeightLoadBalancer;

impl RandomWeightLoadBalancer {
    /// 在给定权重下选择下标，`point` 取值 `[0, total)`
    fn pick(weights: &[u64], point: u64) -> usize {
        let mut remaining = point;
        for (index, weight) in weights.iter().enumerate() {
            if remaining < *weight {
                return index;
            }
            remaining -= weight;
        }
        weights.len().saturating_sub(1)
    }
}

impl LoadBalancer for RandomWeightLoadBalancer {
    fn name(&self) -> &str {
        "random_weight"
    }

    fn choose(
        &self,
        endpoints: &[SharedEndpoint],
        invocation: &OutboundInvocation,
    ) -> Option<SharedEndpoint> {
        match endpoints.len() {
            0 => return None,
            1 => return endpoints.first().cloned(),
            _ => {}
        }

        let ratio = invocation.weight_ratio();
        let weights: Vec<u64> = endpoints
            .iter()
            .map(|e| u64::from(e.effective_weight(ratio, invocation.now)))
            .collect();
        let total: u64 = weights.iter().sum();
        let mut rng = rand::thread_rng();

        // 权重全为零或全部相同时退化为均匀随机
        let uniform = total == 0 || weights.iter().all(|w| *w == weights[0]);
        let index = if uniform {
            rng.gen_range(0..endpoints.len())
        } else {
            Self::pick(&weights, rng.gen_range(0..total))
        };
        endpoints.get(index).cloned()
    }
}

/// 轮询，每个服务独立计数
#[derive(Debug, Default)]
pub struct RoundRobinLoadBalancer {
    counters: DashMap<String, AtomicUsize>,
}

impl LoadBalancer for RoundRobinLoadBalancer {
    fn name(&self) -> &str {
        "round_robin"
    }

    fn choose(
        &self,
        endpoints: &[SharedEndpoint],
        invocation: &OutboundInvocation,
    ) -> Option<SharedEndpoint> {
        if endpoints.is_empty() {
            return None;
        }
        let key = invocation.request.service.to_string();
        let next = match self.counters.get(&key) {
            Some(counter) => counter.fetch_add(1, Ordering::Relaxed),
            None => self
                .counters
                .entry(key)
                .or_default()
                .fetch_add(1, Ordering::Relaxed),
        };
        endpoints.get(next % endpoints.len()).cloned()
    }
}
