//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了进程内的缓存后端实现，与 Redis 后端保持相同的逐项批量语义。

use super::{Cacher, Fetched};
use crate::context::CacheContext;
use crate::error::{CacheError, MultiError, Result};
use crate::item::{max_payload_size, Item, DEFAULT_MAX_RECORD_SIZE};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{debug, instrument};

#[derive(Clone, Debug)]
struct StoredValue {
    raw: Vec<u8>,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(item: &Item) -> Self {
        // 超出时钟范围的过期时间按永不过期处理
        let expires_at = if item.expiration.is_zero() {
            None
        } else {
            Instant::now().checked_add(item.expiration)
        };
        Self {
            raw: item.encode(),
            expires_at,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// 内存缓存后端
///
/// 每个键的操作在 DashMap 分片锁内原子完成；过期项在访问时惰性清理。
/// CAS 令牌与 Redis 后端相同，是读取时的原始负载，逐字节比较。
#[derive(Debug)]
pub struct MemoryCacher {
    entries: DashMap<String, StoredValue>,
    max_payload: usize,
}

impl Default for MemoryCacher {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCacher {
    pub fn new() -> Self {
        Self::with_max_record_size(DEFAULT_MAX_RECORD_SIZE)
    }

    pub fn with_max_record_size(max_record_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_payload: max_payload_size(max_record_size),
        }
    }

    /// 直接写入原始负载，绕过编码（用于模拟不兼容的写入者）
    pub fn insert_raw(&self, key: impl Into<String>, raw: Vec<u8>) {
        self.entries.insert(
            key.into(),
            StoredValue {
                raw,
                expires_at: None,
            },
        );
    }

    /// 清空全部缓存项，模拟缓存服务重启
    pub fn flush_all(&self) {
        self.entries.clear();
    }

    /// 当前未过期的项数
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_size(&self, item: &Item) -> Option<CacheError> {
        let size = item.payload_len();
        (size > self.max_payload).then_some(CacheError::PayloadTooLarge {
            size,
            max: self.max_payload,
        })
    }

    fn add_one(&self, item: &Item, now: Instant) -> Option<CacheError> {
        if let Some(err) = self.check_size(item) {
            return Some(err);
        }
        match self.entries.entry(item.key.clone()) {
            Entry::Occupied(existing) if existing.get().is_live(now) => Some(CacheError::NotStored),
            Entry::Occupied(mut expired) => {
                expired.insert(StoredValue::new(item));
                None
            }
            Entry::Vacant(slot) => {
                slot.insert(StoredValue::new(item));
                None
            }
        }
    }

    fn set_one(&self, item: &Item) -> Option<CacheError> {
        if let Some(err) = self.check_size(item) {
            return Some(err);
        }
        self.entries.insert(item.key.clone(), StoredValue::new(item));
        None
    }

    fn swap_one(&self, item: &Item, now: Instant) -> Option<CacheError> {
        let Some(token) = item.cas() else {
            return Some(CacheError::NotStored);
        };
        if let Some(err) = self.check_size(item) {
            return Some(err);
        }
        match self.entries.entry(item.key.clone()) {
            Entry::Occupied(mut current)
                if current.get().is_live(now) && current.get().raw == token.as_bytes() =>
            {
                current.insert(StoredValue::new(item));
                None
            }
            _ => Some(CacheError::CasConflict),
        }
    }

    fn delete_one(&self, key: &str, now: Instant) -> Option<CacheError> {
        match self.entries.remove(key) {
            Some((_, value)) if value.is_live(now) => None,
            _ => Some(CacheError::CacheMiss),
        }
    }

    fn apply<T>(&self, ctx: &CacheContext, batch: &[T], op: impl Fn(&T, Instant) -> Option<CacheError>) -> Result<()> {
        ctx.check()?;
        let now = Instant::now();
        let mut errors = MultiError::new(batch.len());
        for (i, entry) in batch.iter().enumerate() {
            if let Some(err) = op(entry, now) {
                errors.set(i, err);
            }
        }
        errors.into_result()
    }
}

#[async_trait]
impl Cacher for MemoryCacher {
    async fn new_context(&self, ctx: &CacheContext) -> Result<CacheContext> {
        ctx.check()?;
        Ok(ctx.clone())
    }

    #[instrument(skip(self, ctx, items), level = "debug", fields(item_count = items.len()))]
    async fn add_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()> {
        self.apply(ctx, items, |item, now| self.add_one(item, now))
    }

    #[instrument(skip(self, ctx, items), level = "debug", fields(item_count = items.len()))]
    async fn set_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()> {
        self.apply(ctx, items, |item, _| self.set_one(item))
    }

    #[instrument(skip(self, ctx, items), level = "debug", fields(item_count = items.len()))]
    async fn compare_and_swap_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()> {
        self.apply(ctx, items, |item, now| self.swap_one(item, now))
    }

    #[instrument(skip(self, ctx, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_multi(&self, ctx: &CacheContext, keys: &[String]) -> Result<Fetched> {
        ctx.check()?;
        let now = Instant::now();
        let mut items = HashMap::with_capacity(keys.len());
        let mut errors = MultiError::new(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let lookup = self
                .entries
                .get(key)
                .map(|value| value.is_live(now).then(|| value.raw.clone()));
            let raw = match lookup {
                Some(Some(raw)) => raw,
                Some(None) => {
                    self.entries.remove_if(key, |_, value| !value.is_live(now));
                    continue;
                }
                None => continue,
            };
            match Item::decode(key.clone(), raw) {
                Ok(item) => {
                    items.insert(key.clone(), item);
                }
                Err(err) => errors.set(i, err),
            }
        }
        debug!("memory get_multi: {} of {} keys hit", items.len(), keys.len());
        Ok(Fetched {
            items,
            errors: errors.has_errors().then_some(errors),
        })
    }

    #[instrument(skip(self, ctx, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete_multi(&self, ctx: &CacheContext, keys: &[String]) -> Result<()> {
        self.apply(ctx, keys, |key, now| self.delete_one(key, now))
    }
}
