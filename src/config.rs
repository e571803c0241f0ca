//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存一致性层的配置结构和解析逻辑。

use crate::error::{CacheError, Result};
use crate::item::{max_payload_size, DEFAULT_MAX_RECORD_SIZE};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const CONFIG_VERSION: u32 = 1;

/// 锁标记默认存活时间（毫秒）
pub const DEFAULT_LOCK_TTL_MS: u64 = 32_000;

/// 锁标记允许的最长存活时间（毫秒）
pub const MAX_LOCK_TTL_MS: u64 = 300_000;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub config_version: Option<u32>,
    pub redis: RedisConfig,
    pub coordinator: CoordinatorConfig,
    pub limits: LimitsConfig,
}

/// Redis 连接配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RedisConfig {
    /// 连接字符串
    pub connection_string: SecretString,
    /// 连接池大小
    pub pool_size: usize,
    /// 获取/建立连接的超时时间（毫秒），0 表示不限制
    pub connection_timeout_ms: u64,
    /// 单次调用的超时时间（毫秒），0 表示不限制
    pub command_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            connection_string: SecretString::new("redis://localhost:6379".to_string().into()),
            pool_size: 16,
            connection_timeout_ms: 5000,
            command_timeout_ms: 3000,
        }
    }
}

/// 协调器配置
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// 锁标记的存活时间（毫秒），决定最坏情况下的缓存不可用窗口
    pub lock_ttl_ms: u64,
    /// 缓存键前缀
    pub key_prefix: String,
    /// 回填缓存项的过期时间（秒），0 表示永不过期
    pub cache_ttl_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: DEFAULT_LOCK_TTL_MS,
            key_prefix: "oxlock".to_string(),
            cache_ttl_secs: 0,
        }
    }
}

impl CoordinatorConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// 验证协调器配置
    pub fn validate(&self) -> std::result::Result<(), String> {
        lock_ttl_from_millis(self.lock_ttl_ms)?;

        if self.key_prefix.is_empty() {
            return Err("Coordinator key_prefix cannot be empty".to_string());
        }

        if self.key_prefix.len() > 64 {
            return Err(format!(
                "Coordinator key_prefix '{}' exceeds maximum length of 64 characters",
                self.key_prefix
            ));
        }

        Ok(())
    }
}

/// 检查锁标记 TTL；为零的锁标记永不过期，因此不被接受
pub fn lock_ttl_from_millis(ms: u64) -> std::result::Result<Duration, String> {
    if ms == 0 || ms > MAX_LOCK_TTL_MS {
        return Err(format!(
            "Coordinator lock_ttl_ms must be between 1 and {} milliseconds",
            MAX_LOCK_TTL_MS
        ));
    }
    Ok(Duration::from_millis(ms))
}

/// 负载大小限制
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct LimitsConfig {
    /// 权威存储的最大记录大小（字节）
    pub max_record_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }
}

impl LimitsConfig {
    /// 单项线上负载的最大大小
    pub fn max_payload_size(&self) -> usize {
        max_payload_size(self.max_record_size)
    }
}

impl Config {
    /// 从 TOML 字符串解析并验证配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| CacheError::ConfigError(format!("Failed to parse config: {}", e)))?;
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(config)
    }

    /// 从 TOML 文件加载配置
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            CacheError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// 验证配置
    ///
    /// 检查配置的有效性，确保所有值都在合理范围内
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(version) = &self.config_version {
            if *version > CONFIG_VERSION {
                return Err(format!(
                    "Configuration version {} is not supported. Current version is {}.",
                    version, CONFIG_VERSION
                ));
            }
        }

        if self.redis.pool_size == 0 {
            return Err("Redis pool_size cannot be zero".to_string());
        }

        self.coordinator.validate()?;

        if self.limits.max_record_size == 0 {
            return Err("Limits max_record_size cannot be zero".to_string());
        }

        Ok(())
    }
}
