//! 限流器工厂模块
//!
//! 按策略创建限流器。多个工厂以实现类型名（如 `local`、`redis`）区分，
//! 由 [`LimiterManager`](crate::limiter_manager::LimiterManager) 按策略声明的类型选择。

use crate::constants::LIMITER_TYPE_LOCAL;
use crate::error::GovernanceError;
use crate::limiters::{FixedWindowLimiter, RateLimiter, SlidingWindowLimiter, TokenBucketLimiter};
use crate::policy::{LimitAlgorithm, RateLimitPolicy};
use std::sync::Arc;
use std::time::Duration;

/// 单个限流器允许的最大容量
const MAX_LIMIT: u64 = 10_000_000;

/// 限流器工厂
pub trait RateLimiterFactory: Send + Sync {
    /// 实现类型名
    fn type_name(&self) -> &str;

    /// 为策略创建限流器
    ///
    /// # 参数
    /// - `key`: 限流器在全局范围内的唯一键（服务 + 策略 + 版本）
    /// - `policy`: 限流策略
    fn get(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> Result<Arc<dyn RateLimiter>, GovernanceError>;
}

/// 本地限流器工厂
///
/// # 示例
///
/// ```rust
/// use trafficgate::factory::{LocalRateLimiterFactory, RateLimiterFactory};
/// use trafficgate::limiters::RateLimiter;
/// use trafficgate::policy::{LimitAlgorithm, RateLimitPolicy};
///
/// let policy = RateLimitPolicy::new(
///     "api",
///     LimitAlgorithm::TokenBucket { capacity: 100, refill_rate: 10 },
/// );
/// let limiter = LocalRateLimiterFactory.get("orders/api@0", &policy).unwrap();
/// assert_eq!(limiter.type_name(), "token_bucket");
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRateLimiterFactory;

impl LocalRateLimiterFactory {
    /// 按算法创建限流器
    pub fn create(algorithm: &LimitAlgorithm) -> Result<Arc<dyn RateLimiter>, GovernanceError> {
        validate_algorithm(algorithm)?;
        let limiter: Arc<dyn RateLimiter> = match algorithm {
            LimitAlgorithm::TokenBucket {
                capacity,
                refill_rate,
            } => Arc::new(TokenBucketLimiter::new(*capacity, *refill_rate)),
            LimitAlgorithm::FixedWindow {
                window_size,
                max_requests,
            } => Arc::new(FixedWindowLimiter::new(
                parse_window_size(window_size)?,
                *max_requests,
            )),
            LimitAlgorithm::SlidingWindow {
                window_size,
                max_requests,
            } => Arc::new(SlidingWindowLimiter::new(
                parse_window_size(window_size)?,
                *max_requests,
            )),
        };
        Ok(limiter)
    }
}

impl RateLimiterFactory for LocalRateLimiterFactory {
    fn type_name(&self) -> &str {
        LIMITER_TYPE_LOCAL
    }

    fn get(
        &self,
        _key: &str,
        policy: &RateLimitPolicy,
    ) -> Result<Arc<dyn RateLimiter>, GovernanceError> {
        Self::create(&policy.algorithm)
    }
}

/// 解析窗口大小字符串
///
/// 支持 `ms`、`s`、`m`、`h`、`d` 单位，如 `500ms`、`10s`、`5m`。
pub fn parse_window_size(window_size: &str) -> Result<Duration, GovernanceError> {
    let window_size = window_size.trim();
    if window_size.is_empty() {
        return Err(GovernanceError::ConfigError("窗口大小不能为空".to_string()));
    }

    let split = window_size
        .find(|c: char| c.is_alphabetic())
        .unwrap_or(window_size.len());
    let (num_part, unit_part) = window_size.split_at(split);
    let num_str = num_part.trim();
    let unit = unit_part.trim().to_lowercase();

    if num_str.is_empty() {
        return Err(GovernanceError::ConfigError(
            "窗口大小格式错误：缺少数字部分".to_string(),
        ));
    }

    let num: u64 = num_str
        .parse()
        .map_err(|_| GovernanceError::ConfigError(format!("无效的数字格式: {}", num_str)))?;
    if num == 0 {
        return Err(GovernanceError::ConfigError("窗口大小必须大于0".to_string()));
    }

    let duration = match unit.as_str() {
        "ms" | "millis" => Duration::from_millis(num),
        "s" | "sec" | "second" | "seconds" => Duration::from_secs(num),
        "m" | "min" | "minute" | "minutes" => Duration::from_secs(num.saturating_mul(60)),
        "h" | "hr" | "hour" | "hours" => Duration::from_secs(num.saturating_mul(3600)),
        "d" | "day" | "days" => Duration::from_secs(num.saturating_mul(86400)),
        _ => {
            return Err(GovernanceError::ConfigError(format!(
                "不支持的单位: {}。支持的单位: ms, s, m, h, d",
                unit
            )));
        }
    };

    Ok(duration)
}

/// 验证限流算法参数
pub fn validate_algorithm(algorithm: &LimitAlgorithm) -> Result<(), GovernanceError> {
    match algorithm {
        LimitAlgorithm::TokenBucket {
            capacity,
            refill_rate,
        } => {
            if *capacity == 0 {
                return Err(GovernanceError::ConfigError(
                    "令牌桶容量必须大于0".to_string(),
                ));
            }
            if *refill_rate == 0 {
                return Err(GovernanceError::ConfigError(
                    "令牌桶补充速率必须大于0".to_string(),
                ));
            }
            if *capacity > MAX_LIMIT {
                return Err(GovernanceError::ConfigError(format!(
                    "令牌桶容量过大，最大值为{}",
                    MAX_LIMIT
                )));
            }
        }
        LimitAlgorithm::FixedWindow {
            window_size,
            max_requests,
        }
        | LimitAlgorithm::SlidingWindow {
            window_size,
            max_requests,
        } => {
            parse_window_size(window_size)?;
            if *max_requests == 0 {
                return Err(GovernanceError::ConfigError(
                    "窗口最大请求数必须大于0".to_string(),
                ));
            }
            if *max_requests > MAX_LIMIT {
                return Err(GovernanceError::ConfigError(format!(
                    "窗口最大请求数过大，最大值为{}",
                    MAX_LIMIT
                )));
            }
        }
    }

    Ok(())
}

/// 验证限流策略
pub fn validate_policy(policy: &RateLimitPolicy) -> Result<(), GovernanceError> {
    if policy.name.is_empty() {
        return Err(GovernanceError::ConfigError("限流策略名称不能为空".to_string()));
    }
    if let Some(realize_type) = &policy.realize_type {
        if realize_type.is_empty() {
            return Err(GovernanceError::ConfigError(format!(
                "限流策略 {} 的实现类型不能为空",
                policy.name
            )));
        }
    }
    validate_algorithm(&policy.algorithm)
}

// ============================================================================
// 单元测试
// ============================================================================
