//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了运维操作命令的实现。

use crate::backend::{Cacher, RedisCacher};
use crate::cli::InvalidateArgs;
use crate::config::{lock_ttl_from_millis, Config};
use crate::context::CacheContext;
use crate::coordinator::lock_marker;
use crate::error::CacheError;
use crate::item::Item;
use anyhow::Result;
use std::time::Duration;

pub async fn execute_probe(cacher: &RedisCacher) -> Result<()> {
    println!("Connected. CAS script sha: {}", cacher.script_sha());
    println!("Max payload size: {} bytes", cacher.max_payload());
    Ok(())
}

pub async fn execute_reload(cacher: &RedisCacher) -> Result<()> {
    let sha = cacher.reload_script().await?;
    println!("CAS script registered: {}", sha);
    Ok(())
}

/// 手动失效使用的锁 TTL；锁标记必须能自行过期
pub(crate) fn invalidate_ttl(config: &Config, args: &InvalidateArgs) -> Result<Duration> {
    let ms = args.ttl_ms.unwrap_or(config.coordinator.lock_ttl_ms);
    lock_ttl_from_millis(ms).map_err(anyhow::Error::msg)
}

pub async fn execute_invalidate(cacher: &RedisCacher, config: &Config, args: &InvalidateArgs) -> Result<()> {
    let ttl = invalidate_ttl(config, args)?;
    let locks: Vec<Item> = args.keys.iter().map(|key| lock_marker(key.as_str(), ttl)).collect();

    let ctx = cacher.new_context(&CacheContext::new()).await?;
    match cacher.set_multi(&ctx, &locks).await {
        Ok(()) => {
            println!("Locked {} keys for {}ms.", locks.len(), ttl.as_millis());
            Ok(())
        }
        Err(CacheError::Multi(me)) => {
            for (key, slot) in args.keys.iter().zip(me.iter()) {
                match slot {
                    Some(err) => println!("  {} ❌ {}", key, err),
                    None => println!("  {} ✅ locked", key),
                }
            }
            Err(CacheError::Multi(me).into())
        }
        Err(err) => Err(err.into()),
    }
}
