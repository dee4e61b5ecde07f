//! 熔断器实现
//!
//! 提供按端点隔离的熔断器，支持三状态转换和自动恢复。
//!
//! # 特性
//!
//! - **三状态**: Closed（关闭）、Open（打开）、HalfOpen（半开）
//! - **自动熔断**: 连续失败次数达到阈值自动熔断
//! - **自动恢复**: 超时后放行有限的探测请求，探测结果超时未反馈时重新发放名额
//! - **无锁读取**: 状态和计数都是原子变量，路由过滤器可以同步调用

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace, warn};

/// 默认失败阈值
pub const DEFAULT_FAILURE_THRESHOLD: u64 = 5;

/// 默认成功阈值
pub const DEFAULT_SUCCESS_THRESHOLD: u64 = 2;

/// 默认超时时间（1分钟）
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// 默认半开状态最大调用数
pub const DEFAULT_HALF_OPEN_MAX_CALLS: u64 = 3;

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// 熔断器配置
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// 失败阈值（达到此值时熔断）
    pub failure_threshold: u64,
    /// 成功阈值（半开状态下达到此值时恢复）
    pub success_threshold: u64,
    /// 超时时间（打开状态后等待此时间再尝试恢复）
    pub timeout: Duration,
    /// 半开状态的最大调用次数
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u64, success_threshold: u64, timeout: Duration) -> Self {
        Self {
            failure_threshold,
            success_threshold,
            timeout,
            half_open_max_calls: DEFAULT_HALF_OPEN_MAX_CALLS,
        }
    }

    /// 设置半开状态的最大调用次数
    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.half_open_max_calls = max_calls;
        self
    }

    /// 验证配置
    pub fn validate(&self) -> Result<(), String> {
        if self.failure_threshold == 0 {
            return Err("failure_threshold must be greater than 0".to_string());
        }
        if self.success_threshold == 0 {
            return Err("success_threshold must be greater than 0".to_string());
        }
        if self.half_open_max_calls == 0 {
            return Err("half_open_max_calls must be greater than 0".to_string());
        }
        if self.success_threshold > self.half_open_max_calls {
            return Err(format!(
                "success_threshold {} exceeds half_open_max_calls {}",
                self.success_threshold, self.half_open_max_calls
            ));
        }
        if self.timeout.is_zero() {
            return Err("timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// 熔断器统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    pub total_calls: u64,
}

/// 熔断器
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    failure_count: AtomicU64,
    success_count: AtomicU64,
    total_calls: AtomicU64,
    /// 半开状态下未反馈结果的探测数
    half_open_calls: AtomicU64,
    /// 打开时刻；半开状态下为本轮探测名额的发放时刻
    opened_at: Mutex<Option<Instant>>,
    config: CircuitBreakerConfig,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// 创建新的熔断器
    ///
    /// # 示例
    /// ```rust
    /// use trafficgate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    /// use std::time::Duration;
    ///
    /// let breaker = CircuitBreaker::new(CircuitBreakerConfig::new(1, 1, Duration::from_secs(60)));
    /// assert!(breaker.try_acquire());
    /// breaker.on_failure();
    /// assert_eq!(breaker.state(), CircuitState::Open);
    /// assert!(!breaker.try_acquire());
    /// ```
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed.as_u8()),
            failure_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
            half_open_calls: AtomicU64::new(0),
            opened_at: Mutex::new(None),
            config,
        }
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// 打开状态是否已超时
    fn open_expired(&self) -> bool {
        self.opened_at
            .lock()
            .map_or(true, |opened| opened.elapsed() >= self.config.timeout)
    }

    /// 只读检查是否可以放行，不占用半开探测名额
    pub fn is_available(&self) -> bool {
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => self.open_expired(),
            CircuitState::HalfOpen => {
                self.half_open_calls.load(Ordering::Acquire) < self.config.half_open_max_calls
                    || self.open_expired()
            }
        }
    }

    /// 申请一次调用
    ///
    /// 打开状态超时后切换到半开，当前请求作为第一个探测请求放行。
    pub fn try_acquire(&self) -> bool {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        match self.state() {
            CircuitState::Closed => true,
            CircuitState::Open => {
                if !self.open_expired() {
                    trace!("熔断器打开，拒绝请求");
                    return false;
                }
                self.transition_to_half_open()
            }
            CircuitState::HalfOpen => {
                let max = self.config.half_open_max_calls;
                let acquired = self
                    .half_open_calls
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |calls| {
                        (calls < max).then_some(calls + 1)
                    })
                    .is_ok();
                if acquired {
                    return true;
                }
                if self.renew_probes() {
                    return true;
                }
                trace!("半开状态调用次数已达上限，拒绝请求");
                false
            }
        }
    }

    /// 本轮探测超时仍未全部反馈时重新发放名额，调用方获得第一个名额
    fn renew_probes(&self) -> bool {
        let mut window = self.opened_at.lock();
        if !window.map_or(true, |start| start.elapsed() >= self.config.timeout) {
            return false;
        }
        if self.state() != CircuitState::HalfOpen {
            return false;
        }
        *window = Some(Instant::now());
        self.half_open_calls.store(1, Ordering::Release);
        warn!("熔断器半开探测超时未反馈，重新发放探测名额");
        true
    }

    /// 调用成功
    pub fn on_success(&self) {
        match self.state() {
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::Release);
                self.success_count.fetch_add(1, Ordering::Relaxed);
            }
            CircuitState::HalfOpen => {
                let _ = self.half_open_calls.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |calls| calls.checked_sub(1),
                );
                let success_count = self.success_count.fetch_add(1, Ordering::AcqRel) + 1;
                if success_count >= self.config.success_threshold {
                    self.transition_to_closed();
                } else {
                    trace!(
                        "操作成功（半开状态）: {}/{}",
                        success_count,
                        self.config.success_threshold
                    );
                }
            }
            CircuitState::Open => {}
        }
    }

    /// 调用失败
    pub fn on_failure(&self) {
        match self.state() {
            CircuitState::Closed => {
                let failure_count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
                if failure_count >= self.config.failure_threshold {
                    self.transition_to_open(CircuitState::Closed);
                }
            }
            CircuitState::HalfOpen => self.transition_to_open(CircuitState::HalfOpen),
            CircuitState::Open => {}
        }
    }

    fn transition_to_open(&self, from: CircuitState) {
        if self
            .state
            .compare_exchange(
                from.as_u8(),
                CircuitState::Open.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            *self.opened_at.lock() = Some(Instant::now());
            self.success_count.store(0, Ordering::Release);
            self.half_open_calls.store(0, Ordering::Release);
            warn!(
                "熔断器状态变更: {:?} -> Open (failure_count={})",
                from,
                self.failure_count.load(Ordering::Acquire)
            );
        }
    }

    /// 切换到半开，成功切换的调用方获得第一个探测名额
    fn transition_to_half_open(&self) -> bool {
        if self
            .state
            .compare_exchange(
                CircuitState::Open.as_u8(),
                CircuitState::HalfOpen.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.success_count.store(0, Ordering::Release);
            self.half_open_calls.store(1, Ordering::Release);
            *self.opened_at.lock() = Some(Instant::now());
            info!("熔断器状态变更: Open -> HalfOpen");
            return true;
        }
        false
    }

    fn transition_to_closed(&self) {
        if self
            .state
            .compare_exchange(
                CircuitState::HalfOpen.as_u8(),
                CircuitState::Closed.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.failure_count.store(0, Ordering::Release);
            self.success_count.store(0, Ordering::Release);
            self.half_open_calls.store(0, Ordering::Release);
            *self.opened_at.lock() = None;
            info!("熔断器状态变更: HalfOpen -> Closed");
        }
    }

    /// 重置熔断器到关闭状态
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed.as_u8(), Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.success_count.store(0, Ordering::Release);
        self.total_calls.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
        *self.opened_at.lock() = None;
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        CircuitBreakerStats {
            state: self.state(),
            failure_count: self.failure_count.load(Ordering::Acquire),
            success_count: self.success_count.load(Ordering::Acquire),
            total_calls: self.total_calls.load(Ordering::Acquire),
        }
    }
}

// ============================================================================
// 端点熔断器注册表
// ============================================================================

/// 端点熔断器注册表
///
/// 以端点 ID 为键，首次反馈调用结果时创建熔断器。
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    /// 获取或创建熔断器
    pub fn get(&self, id: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.get(id) {
            return Arc::clone(breaker.value());
        }
        self.breakers
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .value()
            .clone()
    }

    pub fn get_if_exists(&self, id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(id).map(|b| Arc::clone(b.value()))
    }

    /// 端点是否可用，没有熔断器的端点视为可用
    pub fn is_available(&self, id: &str) -> bool {
        self.breakers
            .get(id)
            .map_or(true, |breaker| breaker.is_available())
    }

    /// 为选中的端点申请调用
    pub fn try_acquire(&self, id: &str) -> bool {
        self.breakers
            .get(id)
            .map_or(true, |breaker| breaker.try_acquire())
    }

    pub fn on_success(&self, id: &str) {
        if let Some(breaker) = self.breakers.get(id) {
            breaker.on_success();
        }
    }

    pub fn on_failure(&self, id: &str) {
        self.get(id).on_failure();
    }

    pub fn remove(&self, id: &str) {
        self.breakers.remove(id);
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
