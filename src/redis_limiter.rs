//! Redis 分布式限流
//!
//! 多个进程共享同一 Redis 计数，使用 Lua 脚本保证固定窗口计数的原子性。
//!
//! # 特性
//!
//! - **引用计数**: 相同配置的客户端只建立一次连接，`acquire`/`release` 显式管理生命周期
//! - **原子计数**: 计数、过期和超限回退在一个脚本内完成
//! - **错误传播**: 后端故障以 `Err` 返回，由调用方决定放行或拒绝

use crate::constants::LIMITER_TYPE_REDIS;
use crate::error::GovernanceError;
use crate::factory::{parse_window_size, validate_algorithm, RateLimiterFactory};
use crate::limiters::{AcquireFuture, RateLimiter, FIXED_WINDOW};
use crate::policy::{LimitAlgorithm, RateLimitPolicy};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, Script};
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// 固定窗口计数脚本
///
/// 参数: KEYS[1] - 窗口键, ARGV[1] - 过期时间(ms), ARGV[2] - 窗口上限, ARGV[3] - 许可数
/// 返回: 1 允许，0 拒绝
const FIXED_WINDOW_SCRIPT: &str = r#"
local permits = tonumber(ARGV[3])
local current = redis.call('INCRBY', KEYS[1], permits)
if current == permits then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
if current > tonumber(ARGV[2]) then
    redis.call('DECRBY', KEYS[1], permits)
    return 0
end
return 1
"#;

/// 令牌桶在 Redis 后端按 1 秒窗口近似
const TOKEN_BUCKET_WINDOW: Duration = Duration::from_secs(1);

/// Redis 连接配置
#[derive(Clone)]
pub struct RedisLimiterConfig {
    /// Redis连接URL
    pub url: String,
    /// 数据库索引
    pub db: i64,
    /// 密码（使用 Secret 包装以防止意外泄露）
    pub password: Option<Secret<String>>,
    /// 键前缀
    pub key_prefix: String,
}

impl RedisLimiterConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            db: 0,
            password: None,
            key_prefix: "trafficgate".to_string(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    pub fn with_db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// 客户端共享键，不含密码
    pub fn client_key(&self) -> String {
        format!("{}#{}", self.url, self.db)
    }

    fn client(&self) -> Result<Client, GovernanceError> {
        let mut info = self
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| GovernanceError::ConfigError(format!("无效的Redis地址: {}", e)))?;
        info.redis.db = self.db;
        if let Some(password) = &self.password {
            info.redis.password = Some(password.expose_secret().clone());
        }
        Client::open(info).map_err(|e| {
            error!("创建Redis客户端失败: {}", e);
            GovernanceError::LimitError(format!("创建Redis客户端失败: {}", e))
        })
    }
}

impl std::fmt::Debug for RedisLimiterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLimiterConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

// ============================================================================
// 客户端管理
// ============================================================================

struct ClientEntry {
    connection: ConnectionManager,
    refs: usize,
}

/// Redis 客户端管理器
///
/// 按 [`RedisLimiterConfig::client_key`] 共享连接。每次 `acquire` 必须对应一次 `release`，
/// 引用归零时连接被丢弃。
#[derive(Default)]
pub struct RedisClientManager {
    clients: DashMap<String, ClientEntry>,
}

impl RedisClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取连接，首次使用时建立
    pub async fn acquire(
        &self,
        config: &RedisLimiterConfig,
    ) -> Result<ConnectionManager, GovernanceError> {
        let key = config.client_key();
        if let Some(mut entry) = self.clients.get_mut(&key) {
            entry.refs += 1;
            return Ok(entry.connection.clone());
        }

        let connection = ConnectionManager::new(config.client()?)
            .await
            .map_err(|e| {
                error!("创建Redis连接管理器失败: {}", e);
                GovernanceError::LimitError(format!("创建Redis连接管理器失败: {}", e))
            })?;

        // 并发建立连接时保留先写入的一个
        let mut entry = self.clients.entry(key.clone()).or_insert(ClientEntry {
            connection,
            refs: 0,
        });
        entry.refs += 1;
        info!("Redis client {} acquired ({} refs)", key, entry.refs);
        Ok(entry.connection.clone())
    }

    /// 归还连接，返回剩余引用数
    pub fn release(&self, config: &RedisLimiterConfig) -> usize {
        let key = config.client_key();
        let remaining = match self.clients.get_mut(&key) {
            Some(mut entry) => {
                entry.refs = entry.refs.saturating_sub(1);
                entry.refs
            }
            None => return 0,
        };
        if remaining == 0 {
            self.clients.remove_if(&key, |_, entry| entry.refs == 0);
            info!("Redis client {} closed", key);
        }
        remaining
    }

    /// 当前引用数
    pub fn refs(&self, config: &RedisLimiterConfig) -> usize {
        self.clients
            .get(&config.client_key())
            .map(|entry| entry.refs)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ============================================================================
// 限流器
// ============================================================================

/// Redis 固定窗口限流器
pub struct RedisRateLimiter {
    connection: ConnectionManager,
    script: Arc<Script>,
    key: String,
    window: Duration,
    max_requests: u64,
}

impl RedisRateLimiter {
    /// 当前窗口对应的键
    fn window_key(&self) -> String {
        let window_ms = (self.window.as_millis() as i64).max(1);
        let index = chrono::Utc::now().timestamp_millis() / window_ms;
        format!("{}:{}", self.key, index)
    }
}

impl RateLimiter for RedisRateLimiter {
    fn type_name(&self) -> &str {
        FIXED_WINDOW
    }

    fn acquire(&self, permits: u64) -> AcquireFuture<'_> {
        Box::pin(async move {
            if permits == 0 {
                return Err(GovernanceError::LimitError("许可数量不能为零".to_string()));
            }
            let key = self.window_key();
            let ttl_ms = self.window.as_millis() as u64 + 1000;
            let mut connection = self.connection.clone();
            let allowed: i64 = self
                .script
                .key(&key)
                .arg(ttl_ms)
                .arg(self.max_requests)
                .arg(permits)
                .invoke_async(&mut connection)
                .await
                .map_err(|e| {
                    error!("Redis限流脚本执行失败 {}: {}", key, e);
                    GovernanceError::LimitError(format!("Redis限流脚本执行失败: {}", e))
                })?;
            Ok(allowed == 1)
        })
    }
}

/// Redis 限流器工厂
///
/// 创建时从 [`RedisClientManager`] 获取连接，[`close`](Self::close) 时归还。
pub struct RedisRateLimiterFactory {
    manager: Arc<RedisClientManager>,
    config: RedisLimiterConfig,
    connection: ConnectionManager,
    script: Arc<Script>,
}

impl RedisRateLimiterFactory {
    pub async fn new(
        manager: Arc<RedisClientManager>,
        config: RedisLimiterConfig,
    ) -> Result<Self, GovernanceError> {
        let connection = manager.acquire(&config).await?;
        Ok(Self {
            manager,
            config,
            connection,
            script: Arc::new(Script::new(FIXED_WINDOW_SCRIPT)),
        })
    }

    /// 归还连接
    pub fn close(self) -> usize {
        self.manager.release(&self.config)
    }
}

/// 策略在 Redis 后端对应的窗口和上限
fn window_of(algorithm: &LimitAlgorithm) -> Result<(Duration, u64), GovernanceError> {
    validate_algorithm(algorithm)?;
    match algorithm {
        LimitAlgorithm::TokenBucket { capacity, .. } => Ok((TOKEN_BUCKET_WINDOW, *capacity)),
        LimitAlgorithm::FixedWindow {
            window_size,
            max_requests,
        }
        | LimitAlgorithm::SlidingWindow {
            window_size,
            max_requests,
        } => Ok((parse_window_size(window_size)?, *max_requests)),
    }
}

impl RateLimiterFactory for RedisRateLimiterFactory {
    fn type_name(&self) -> &str {
        LIMITER_TYPE_REDIS
    }

    fn get(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
    ) -> Result<Arc<dyn RateLimiter>, GovernanceError> {
        let (window, max_requests) = window_of(&policy.algorithm)?;
        debug!("Creating redis limiter {} ({:?}, {})", key, window, max_requests);
        Ok(Arc::new(RedisRateLimiter {
            connection: self.connection.clone(),
            script: self.script.clone(),
            key: format!("{}:{}", self.config.key_prefix, key),
            window,
            max_requests,
        }))
    }
}
