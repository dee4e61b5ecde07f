//! 服务治理策略
//!
//! 定义服务级策略（限流、并发、负载均衡、粘滞）以及限流策略的匹配条件。

use crate::cookie::HttpMethod;
use crate::invocation::ServiceRequest;
use serde::{Deserialize, Serialize};

/// 限流算法
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LimitAlgorithm {
    /// 令牌桶
    TokenBucket { capacity: u64, refill_rate: u64 },
    /// 固定窗口
    FixedWindow {
        window_size: String,
        max_requests: u64,
    },
    /// 滑动窗口
    SlidingWindow {
        window_size: String,
        max_requests: u64,
    },
}

/// 限流策略匹配条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyCondition {
    /// 路径前缀
    PathPrefix { prefix: String },
    /// HTTP 方法
    Method { methods: Vec<HttpMethod> },
    /// 头部等值
    Header { name: String, value: String },
    /// 仅写操作
    WriteOnly,
}

impl PolicyCondition {
    /// 判断请求是否满足条件
    pub fn matches(&self, request: &ServiceRequest) -> bool {
        match self {
            PolicyCondition::PathPrefix { prefix } => request.path.starts_with(prefix.as_str()),
            PolicyCondition::Method { methods } => methods.contains(&request.method),
            PolicyCondition::Header { name, value } => {
                request.header(name).map_or(false, |v| v == value)
            }
            PolicyCondition::WriteOnly => request.method.is_write(),
        }
    }
}

/// 限流策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// 策略名称
    pub name: String,
    /// 策略版本，变更后限流器会重新创建
    #[serde(default)]
    pub version: u64,
    /// 限流器实现类型（如 `local`、`redis`），缺省使用全局默认类型
    #[serde(default)]
    pub realize_type: Option<String>,
    /// 限流算法
    pub algorithm: LimitAlgorithm,
    /// 匹配条件（全部满足才生效，空表示总是生效）
    #[serde(default)]
    pub conditions: Vec<PolicyCondition>,
}

impl RateLimitPolicy {
    /// 创建限流策略
    pub fn new(name: impl Into<String>, algorithm: LimitAlgorithm) -> Self {
        Self {
            name: name.into(),
            version: 0,
            realize_type: None,
            algorithm,
            conditions: Vec::new(),
        }
    }

    pub fn with_realize_type(mut self, realize_type: impl Into<String>) -> Self {
        self.realize_type = Some(realize_type.into());
        self
    }

    pub fn with_condition(mut self, condition: PolicyCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// 限流器缓存键
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    /// 判断请求是否命中该策略
    pub fn matches(&self, request: &ServiceRequest) -> bool {
        self.conditions.iter().all(|c| c.matches(request))
    }
}

/// 负载均衡类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerKind {
    /// 加权随机
    RandomWeight,
    /// 轮询
    RoundRobin,
}

impl Default for LoadBalancerKind {
    fn default() -> Self {
        Self::RandomWeight
    }
}

/// 服务策略
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServicePolicy {
    /// 服务名
    pub service: String,
    /// 限流策略（按顺序评估）
    #[serde(default)]
    pub rate_limit_policies: Vec<RateLimitPolicy>,
    /// 最大并发数
    #[serde(default)]
    pub concurrency_limit: Option<u64>,
    /// 负载均衡
    #[serde(default)]
    pub load_balancer: LoadBalancerKind,
    /// 是否启用粘滞路由
    #[serde(default)]
    pub sticky: bool,
    /// 权重系数
    #[serde(default)]
    pub weight_ratio: Option<f64>,
}

impl ServicePolicy {
    /// 创建空策略
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit_policies.push(policy);
        self
    }

    pub fn with_concurrency_limit(mut self, limit: u64) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_load_balancer(mut self, kind: LoadBalancerKind) -> Self {
        self.load_balancer = kind;
        self
    }

    pub fn with_sticky(mut self, sticky: bool) -> Self {
        self.sticky = sticky;
        self
    }

    /// 校验策略
    pub fn validate(&self) -> Result<(), String> {
        if self.service.is_empty() {
            return Err("服务名不能为空".to_string());
        }
        if self.concurrency_limit == Some(0) {
            return Err("并发限制数必须大于0".to_string());
        }
        if let Some(ratio) = self.weight_ratio {
            if !ratio.is_finite() || ratio <= 0.0 {
                return Err(format!("无效的权重系数: {}", ratio));
            }
        }
        let mut names = ahash::AHashSet::new();
        for policy in &self.rate_limit_policies {
            if policy.name.is_empty() {
                return Err("限流策略名称不能为空".to_string());
            }
            if !names.insert(policy.name.as_str()) {
                return Err(format!("限流策略名称重复: {}", policy.name));
            }
        }
        Ok(())
    }
}
