//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存内容查看命令的实现。

use crate::backend::{Cacher, RedisCacher};
use crate::cli::InspectArgs;
use crate::context::CacheContext;
use crate::coordinator::CachedValue;
use crate::item::Item;
use anyhow::Result;

pub async fn execute(cacher: &RedisCacher, args: &InspectArgs) -> Result<()> {
    let ctx = cacher.new_context(&CacheContext::new()).await?;
    let fetched = cacher.get_multi(&ctx, &args.keys).await?;

    println!("=== Cache Entries ===\n");
    for (i, key) in args.keys.iter().enumerate() {
        if let Some(err) = fetched.errors.as_ref().and_then(|errors| errors.get(i)) {
            println!("{}: ❌ {}", key, err);
            continue;
        }
        match fetched.get(key) {
            Some(item) => println!("{}: {}", key, describe(item, args.verbose)),
            None => println!("{}: (absent)", key),
        }
    }
    Ok(())
}

fn describe(item: &Item, verbose: bool) -> String {
    match CachedValue::decode(&item.value) {
        Some(CachedValue::Lock) => format!("🔒 lock marker (token {:#010x})", item.flags),
        Some(CachedValue::Missing) => "known missing entity".to_string(),
        Some(CachedValue::Entity(bytes)) if verbose => format!(
            "entity, {} bytes: {}",
            bytes.len(),
            String::from_utf8_lossy(&bytes)
        ),
        Some(CachedValue::Entity(bytes)) => format!("entity, {} bytes", bytes.len()),
        None => format!(
            "foreign value, {} bytes, flags {:#010x}",
            item.value.len(),
            item.flags
        ),
    }
}
