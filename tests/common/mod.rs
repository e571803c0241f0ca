//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了测试的通用工具函数和设置。

#![allow(dead_code)]

pub mod conformance;

use oxlock::config::{LimitsConfig, RedisConfig};
use oxlock::RedisCacher;
use secrecy::SecretString;
use std::sync::Once;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn setup_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_span_events(FmtSpan::CLOSE)
            .with_env_filter(EnvFilter::new("debug"))
            .try_init()
            .ok();
    });
}

/// 测试使用的 Redis 地址，可通过 `REDIS_URL` 覆盖
pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

pub fn redis_config() -> RedisConfig {
    RedisConfig {
        connection_string: SecretString::new(redis_url().into()),
        pool_size: 8,
        connection_timeout_ms: 2000,
        command_timeout_ms: 5000,
    }
}

/// 检查Redis是否可用
///
/// 尝试连接并执行 PING，超时视为不可用
pub async fn is_redis_available() -> bool {
    let probe = async {
        let client = redis::Client::open(redis_url()).ok()?;
        let mut conn = client.get_multiplexed_async_connection().await.ok()?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .ok()
    };
    matches!(
        tokio::time::timeout(Duration::from_secs(2), probe).await,
        Ok(Some(_))
    )
}

/// 连接真实 Redis；不可用时返回 `None`，调用方应跳过测试
pub async fn redis_cacher() -> Option<RedisCacher> {
    setup_logging();
    if !is_redis_available().await {
        println!("跳过测试: Redis不可用 ({})", redis_url());
        return None;
    }
    match RedisCacher::new(&redis_config(), &LimitsConfig::default()).await {
        Ok(cacher) => Some(cacher),
        Err(e) => {
            println!("跳过测试: Redis连接失败 - {}", e);
            None
        }
    }
}

/// 生成唯一的键前缀，避免并行测试之间互相干扰
pub fn unique_prefix(name: &str) -> String {
    format!("oxlock:test:{}:{}", name, uuid::Uuid::new_v4().simple())
}

pub fn keys(prefix: &str, names: &[&str]) -> Vec<String> {
    names.iter().map(|n| format!("{}:{}", prefix, n)).collect()
}
