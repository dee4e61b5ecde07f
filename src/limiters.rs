//! Copyright (c) 2026, Kirky.X
//!
//! Apache License 2.0
//!
//! 限流器模块
//!
//! 实现本地限流算法：令牌桶、固定窗口、滑动窗口，以及基于信号量的并发控制。

use crate::constants::MAX_PERMITS;
use crate::error::GovernanceError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// 令牌桶类型名
pub const TOKEN_BUCKET: &str = "token_bucket";

/// 固定窗口类型名
pub const FIXED_WINDOW: &str = "fixed_window";

/// 滑动窗口类型名
pub const SLIDING_WINDOW: &str = "sliding_window";

/// 验证许可数量
fn validate_permits(permits: u64) -> Result<u64, GovernanceError> {
    if permits == 0 {
        return Err(GovernanceError::LimitError("许可数量不能为零".to_string()));
    }

    if permits > MAX_PERMITS {
        return Err(GovernanceError::LimitError(format!(
            "许可数量超过最大限制（最大 {}）",
            MAX_PERMITS
        )));
    }

    Ok(permits)
}

/// 限流器异步结果
pub type AcquireFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, GovernanceError>> + Send + 'a>>;

/// 限流器
pub trait RateLimiter: Send + Sync {
    /// 限流器类型名，用于拒绝原因
    fn type_name(&self) -> &str;

    /// 尝试获取许可
    ///
    /// # 返回
    /// - `Ok(true)`: 获取成功
    /// - `Ok(false)`: 被限流
    /// - `Err(_)`: 参数错误或后端故障
    fn acquire(&self, permits: u64) -> AcquireFuture<'_>;
}

/// 单调时钟，以纳秒偏移记录在原子变量中
#[derive(Debug)]
struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    fn now_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

// ============================================================================
// 令牌桶
// ============================================================================

/// 令牌桶限流器
///
/// 令牌以恒定速率补充，请求到达时从桶中获取令牌，令牌不足则拒绝。
/// 令牌数和补充时间都使用 CAS 更新。
///
/// # 示例
/// ```rust
/// use trafficgate::limiters::{RateLimiter, TokenBucketLimiter};
///
/// #[tokio::main]
/// async fn main() {
///     let limiter = TokenBucketLimiter::new(100, 10);
///     assert!(limiter.acquire(10).await.unwrap());
/// }
/// ```
#[derive(Debug)]
pub struct TokenBucketLimiter {
    capacity: u64,
    refill_rate: u64,
    tokens: AtomicU64,
    last_refill: AtomicU64,
    clock: MonotonicClock,
}

impl TokenBucketLimiter {
    /// 创建令牌桶
    ///
    /// # 参数
    /// - `capacity`: 桶容量
    /// - `refill_rate`: 每秒补充的令牌数
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        Self {
            capacity,
            refill_rate,
            tokens: AtomicU64::new(capacity),
            last_refill: AtomicU64::new(0),
            clock: MonotonicClock::new(),
        }
    }

    /// 当前令牌数
    pub fn available(&self) -> u64 {
        self.refill();
        self.tokens.load(Ordering::SeqCst)
    }

    fn refill(&self) {
        let now = self.clock.now_nanos();
        loop {
            let last = self.last_refill.load(Ordering::SeqCst);
            let elapsed = now.saturating_sub(last);
            // 不足 1ms 不补充
            if elapsed < 1_000_000 {
                return;
            }

            let to_add = (elapsed as f64 / 1_000_000_000.0 * self.refill_rate as f64) as u64;
            if to_add == 0 {
                return;
            }

            if self
                .last_refill
                .compare_exchange(last, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let _ = self
                    .tokens
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                        Some(current.saturating_add(to_add).min(self.capacity))
                    });
                return;
            }
        }
    }

    fn try_consume(&self, permits: u64) -> bool {
        self.tokens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(permits)
            })
            .is_ok()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn type_name(&self) -> &str {
        TOKEN_BUCKET
    }

    fn acquire(&self, permits: u64) -> AcquireFuture<'_> {
        Box::pin(async move {
            let permits = validate_permits(permits)?;
            self.refill();
            Ok(self.try_consume(permits))
        })
    }
}

// ============================================================================
// 固定窗口
// ============================================================================

/// 固定窗口限流器
///
/// 时间按固定长度切分，每个窗口独立计数，窗口到期后对齐边界重置。
#[derive(Debug)]
pub struct FixedWindowLimiter {
    window_size: Duration,
    max_requests: u64,
    count: AtomicU64,
    window_start: AtomicU64,
    clock: MonotonicClock,
}

impl FixedWindowLimiter {
    pub fn new(window_size: Duration, max_requests: u64) -> Self {
        Self {
            window_size,
            max_requests,
            count: AtomicU64::new(0),
            window_start: AtomicU64::new(0),
            clock: MonotonicClock::new(),
        }
    }

    /// 当前窗口计数
    pub fn count(&self) -> u64 {
        self.roll_window();
        self.count.load(Ordering::SeqCst)
    }

    fn roll_window(&self) {
        let now = self.clock.now_nanos();
        let size = (self.window_size.as_nanos() as u64).max(1);

        loop {
            let start = self.window_start.load(Ordering::SeqCst);
            if now < start.saturating_add(size) {
                return;
            }

            let passed = now.saturating_sub(start) / size;
            let new_start = start.saturating_add(passed * size);
            if self
                .window_start
                .compare_exchange(start, new_start, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                self.count.store(0, Ordering::SeqCst);
                return;
            }
        }
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn type_name(&self) -> &str {
        FIXED_WINDOW
    }

    fn acquire(&self, permits: u64) -> AcquireFuture<'_> {
        Box::pin(async move {
            let permits = validate_permits(permits)?;
            self.roll_window();
            let max = self.max_requests;
            Ok(self
                .count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                    current.checked_add(permits).filter(|next| *next <= max)
                })
                .is_ok())
        })
    }
}

// ============================================================================
// 滑动窗口
// ============================================================================

/// 滑动窗口限流器
///
/// 记录窗口内每个许可的时间戳，统计时先清理过期记录。
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window_size: Duration,
    max_requests: u64,
    requests: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(window_size: Duration, max_requests: u64) -> Self {
        Self {
            window_size,
            max_requests,
            requests: Mutex::new(VecDeque::new()),
        }
    }

    /// 窗口内的许可数
    pub fn count(&self) -> usize {
        let mut requests = self.requests.lock();
        Self::evict(&mut requests, self.window_size, Instant::now());
        requests.len()
    }

    fn evict(requests: &mut VecDeque<Instant>, window: Duration, now: Instant) {
        while let Some(front) = requests.front() {
            if now.duration_since(*front) >= window {
                requests.pop_front();
            } else {
                break;
            }
        }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn type_name(&self) -> &str {
        SLIDING_WINDOW
    }

    fn acquire(&self, permits: u64) -> AcquireFuture<'_> {
        Box::pin(async move {
            let permits = validate_permits(permits)?;
            let now = Instant::now();
            let mut requests = self.requests.lock();
            Self::evict(&mut requests, self.window_size, now);

            if requests.len() as u64 + permits > self.max_requests {
                return Ok(false);
            }
            requests.extend(std::iter::repeat(now).take(permits as usize));
            Ok(true)
        })
    }
}

// ============================================================================
// 并发控制
// ============================================================================

/// 并发控制器
///
/// 许可以 [`ConcurrencyPermit`] 形式交给调用方持有，释放即归还。上限可以在线调整，
/// 调小时已发出的许可仍然计入：空闲许可立即回收，不足部分记为欠额，由之后归还的许可抵扣。
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    max_concurrent: Arc<Mutex<u64>>,
    /// 调小上限时尚未回收的许可数
    debt: Arc<AtomicU64>,
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: u64) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent as usize)),
            max_concurrent: Arc::new(Mutex::new(max_concurrent)),
            debt: Arc::new(AtomicU64::new(0)),
        }
    }

    /// 非阻塞获取许可，并发已满返回 `None`
    pub fn try_acquire(&self, permits: u32) -> Option<ConcurrencyPermit> {
        let permit = Arc::clone(&self.semaphore)
            .try_acquire_many_owned(permits)
            .ok()?;
        Some(ConcurrencyPermit {
            permit: Some(permit),
            permits: u64::from(permits),
            semaphore: Arc::clone(&self.semaphore),
            debt: Arc::clone(&self.debt),
        })
    }

    /// 调整并发上限
    pub fn resize(&self, max_concurrent: u64) {
        let mut current = self.max_concurrent.lock();
        if *current == max_concurrent {
            return;
        }

        if max_concurrent > *current {
            let grow = max_concurrent - *current;
            let repaid = take_debt(&self.debt, grow);
            if grow > repaid {
                self.semaphore.add_permits((grow - repaid) as usize);
            }
        } else {
            let shrink = *current - max_concurrent;
            let idle = (self.semaphore.available_permits() as u64).min(shrink);
            let reclaimed = u32::try_from(idle)
                .ok()
                .filter(|n| *n > 0)
                .and_then(|n| self.semaphore.try_acquire_many(n).ok())
                .map(|permit| {
                    permit.forget();
                    idle
                })
                .unwrap_or(0);
            if shrink > reclaimed {
                self.debt.fetch_add(shrink - reclaimed, Ordering::SeqCst);
            }
        }
        *current = max_concurrent;
    }

    /// 当前可用许可
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn max_concurrent(&self) -> u64 {
        *self.max_concurrent.lock()
    }
}

/// 从欠额中最多扣除 `amount`，返回实际扣除数
fn take_debt(debt: &AtomicU64, amount: u64) -> u64 {
    debt.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| {
        (d > 0).then(|| d.saturating_sub(amount))
    })
    .map(|previous| previous.min(amount))
    .unwrap_or(0)
}

/// 并发许可，丢弃时归还；控制器上限被调小时优先抵扣欠额
#[derive(Debug)]
pub struct ConcurrencyPermit {
    permit: Option<OwnedSemaphorePermit>,
    permits: u64,
    semaphore: Arc<Semaphore>,
    debt: Arc<AtomicU64>,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        let repaid = take_debt(&self.debt, self.permits);
        if repaid > 0 {
            permit.forget();
            if self.permits > repaid {
                self.semaphore.add_permits((self.permits - repaid) as usize);
            }
        }
    }
}
