//! 版本化重试
//!
//! 任务调度时记录当前版本，执行前检查版本是否仍然有效。连接状态变化时推进版本，
//! 之前调度的任务在下一次唤醒时自行放弃，不需要显式取消。

use crate::constants::{DEFAULT_RETRY_INITIAL_DELAY_MS, DEFAULT_RETRY_MAX_DELAY_MS};
use crate::error::RegistryError;
use rand::Rng;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 重试任务结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// 执行成功
    Completed,
    /// 版本失效，任务放弃
    Discarded,
}

/// 版本化重试调度器
#[derive(Debug, Clone)]
pub struct VersionedRetry {
    version: Arc<AtomicU64>,
    discarded: Arc<AtomicU64>,
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for VersionedRetry {
    fn default() -> Self {
        Self::new(
            Duration::from_millis(DEFAULT_RETRY_INITIAL_DELAY_MS),
            Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
        )
    }
}

impl VersionedRetry {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            version: Arc::new(AtomicU64::new(0)),
            discarded: Arc::new(AtomicU64::new(0)),
            initial_delay,
            max_delay,
        }
    }

    /// 当前版本
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// 推进版本，此前调度的任务全部失效
    pub fn advance(&self) -> u64 {
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn is_current(&self, version: u64) -> bool {
        self.version() == version
    }

    /// 因版本失效而放弃的任务数
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// 第 `attempt` 次失败后的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        backoff_delay(self.initial_delay, self.max_delay, attempt)
    }

    /// 调度任务
    ///
    /// 任务在 `delay` 后执行，失败则按指数退避重新执行，直到成功或版本失效。
    pub fn schedule<F, Fut>(&self, name: impl Into<String>, delay: Duration, task: F) -> JoinHandle<RetryOutcome>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), RegistryError>> + Send + 'static,
    {
        let name = name.into();
        let scheduled = self.version();
        let current = Arc::clone(&self.version);
        let discarded = Arc::clone(&self.discarded);
        let (initial_delay, max_delay) = (self.initial_delay, self.max_delay);

        tokio::spawn(async move {
            let mut delay = delay;
            let mut attempt = 0u32;
            loop {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if current.load(Ordering::Acquire) != scheduled {
                    debug!("Retry task {} discarded, version {} is stale", name, scheduled);
                    discarded.fetch_add(1, Ordering::Relaxed);
                    return RetryOutcome::Discarded;
                }

                match task().await {
                    Ok(()) => {
                        debug!("Retry task {} completed after {} failures", name, attempt);
                        return RetryOutcome::Completed;
                    }
                    Err(e) => {
                        attempt = attempt.saturating_add(1);
                        delay = backoff_delay(initial_delay, max_delay, attempt);
                        warn!(
                            "Retry task {} failed (attempt {}): {}, retry in {:?}",
                            name, attempt, e, delay
                        );
                    }
                }
            }
        })
    }
}

/// 指数退避，叠加 0.5~1.5 倍随机抖动，结果不超过上限
fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let base = initial.as_millis() as f64;
    let exponent = attempt.saturating_sub(1).min(16) as i32;
    let delay = (base * 2f64.powi(exponent)).min(max.as_millis() as f64);
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_millis((delay * jitter) as u64).min(max)
}
