//! 预热权重计算
//!
//! 端点启动后的预热窗口内，有效权重从接近0线性增长到基础权重。
//! 计算结果缓存 50ms，调用方接受这段时间内的权重滞后。

use crate::constants::REWEIGHT_CACHE_MILLIS;
use std::sync::atomic::{AtomicU64, Ordering};

/// 预热权重
///
/// 缓存使用单个 `AtomicU64` 存储（时间偏移, 权重）对，读取时两者总是一致的。
/// 高32位为相对 `timestamp` 的毫秒偏移加1（0 表示空），低32位为 `f32` 权重。
#[derive(Debug)]
pub struct Reweight {
    /// 基础权重
    weight: u32,
    /// 预热开始时间（毫秒时间戳，<=0 表示未配置）
    timestamp: i64,
    /// 预热时长（毫秒，<=0 表示未配置）
    warmup: i64,
    /// 计算缓存
    cache: AtomicU64,
}

impl Reweight {
    /// 创建预热权重
    ///
    /// # 参数
    /// - `weight`: 基础权重
    /// - `timestamp`: 预热开始时间（毫秒）
    /// - `warmup`: 预热时长（毫秒）
    pub fn new(weight: u32, timestamp: i64, warmup: i64) -> Self {
        Self {
            weight,
            timestamp,
            // 偏移量需要放进32位
            warmup: warmup.min(u32::MAX as i64 - 1),
            cache: AtomicU64::new(0),
        }
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn warmup(&self) -> i64 {
        self.warmup
    }

    /// 是否处于预热窗口内
    pub fn is_warming(&self, now: i64) -> bool {
        self.timestamp > 0 && self.warmup > 0 && now - self.timestamp < self.warmup
    }

    /// 计算有效权重
    ///
    /// # 参数
    /// - `ratio`: 外部权重系数，`None` 表示 1.0
    /// - `now`: 当前时间（毫秒）
    ///
    /// # 返回
    /// - 基础权重 <=0 时返回 0（不参与加权选择）
    /// - 否则返回 >=1 的权重
    pub fn get_weight(&self, ratio: Option<f64>, now: i64) -> u32 {
        if self.weight == 0 {
            return 0;
        }

        let base = if self.timestamp <= 0 || self.warmup <= 0 {
            self.weight as f64
        } else {
            let span = (now - self.timestamp).max(0);
            if span >= self.warmup {
                self.weight as f64
            } else {
                self.ramp(span)
            }
        };

        let value = base * ratio.unwrap_or(1.0);
        if !value.is_finite() || value < 1.0 {
            1
        } else if value >= u32::MAX as f64 {
            u32::MAX
        } else {
            value as u32
        }
    }

    fn ramp(&self, span: i64) -> f64 {
        let packed = self.cache.load(Ordering::Acquire);
        if packed != 0 {
            let last = (packed >> 32) as i64 - 1;
            if span >= last && span - last < REWEIGHT_CACHE_MILLIS {
                return f32::from_bits(packed as u32) as f64;
            }
        }

        let value = span as f64 / (self.warmup as f64 / self.weight as f64);
        let packed = (((span + 1) as u64) << 32) | (value as f32).to_bits() as u64;
        self.cache.store(packed, Ordering::Release);
        value
    }
}
