//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了缓存一致性协调器：先加锁再修改权威存储，以及感知锁标记的读取路径。
//!
//! 写路径（删除 / 写入）：
//! 1. 校验：任何不完整的键都会在产生副作用之前让整批请求失败；
//! 2. 加锁：为每个键无条件写入带随机令牌、短 TTL 的锁标记，任何失败都中止整批请求；
//! 3. 修改：调用权威存储，其结果即为最终结果。
//!
//! 修改之后不会显式解锁，锁标记依靠自身 TTL 过期。
//!
//! 读路径只会用 CAS 覆盖本次读取自己安装的锁标记，
//! 其他写入者的锁标记永远不会被回填覆盖。

use crate::backend::Cacher;
use crate::config::CoordinatorConfig;
use crate::context::CacheContext;
use crate::error::{CacheError, MultiError, Result};
use crate::item::Item;
use crate::store::{Key, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

const TAG_LOCK: u8 = 0;
const TAG_ENTITY: u8 = 1;
const TAG_MISSING: u8 = 2;

/// 锁标记的固定值
pub const LOCK_SENTINEL: &[u8] = &[TAG_LOCK];

/// 缓存中保存的值
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CachedValue {
    /// 有写入者正在修改该实体
    Lock,
    /// 实体内容
    Entity(Vec<u8>),
    /// 已确认实体不存在
    Missing,
}

impl CachedValue {
    /// 解码缓存值；无法识别的内容返回 `None`，按未命中处理
    pub fn decode(raw: &[u8]) -> Option<Self> {
        match raw.split_first() {
            Some((&TAG_LOCK, [])) => Some(Self::Lock),
            Some((&TAG_ENTITY, rest)) => Some(Self::Entity(rest.to_vec())),
            Some((&TAG_MISSING, [])) => Some(Self::Missing),
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Lock => LOCK_SENTINEL.to_vec(),
            Self::Entity(bytes) => {
                let mut out = Vec::with_capacity(bytes.len() + 1);
                out.push(TAG_ENTITY);
                out.extend_from_slice(bytes);
                out
            }
            Self::Missing => vec![TAG_MISSING],
        }
    }

    fn from_store(value: Option<&Vec<u8>>) -> Self {
        match value {
            Some(bytes) => Self::Entity(bytes.clone()),
            None => Self::Missing,
        }
    }
}

/// 缓存一致性协调器
#[derive(Clone)]
pub struct Coordinator {
    cacher: Arc<dyn Cacher>,
    store: Arc<dyn Store>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// 创建协调器
    ///
    /// 配置不合法（例如锁标记 TTL 为零，锁将永不过期）时返回 `ConfigError`。
    pub fn new(cacher: Arc<dyn Cacher>, store: Arc<dyn Store>, config: CoordinatorConfig) -> Result<Self> {
        config.validate().map_err(CacheError::ConfigError)?;
        Ok(Self {
            cacher,
            store,
            config,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// 实体键对应的缓存键
    pub fn cache_key(&self, key: &Key) -> String {
        format!("{}:{}", self.config.key_prefix, key.encode())
    }

    /// 为缓存键构造一个带新随机令牌的锁标记
    pub fn lock_item(&self, cache_key: String) -> Item {
        lock_marker(cache_key, self.config.lock_ttl())
    }

    /// 批量删除实体
    ///
    /// # 参数
    ///
    /// * `ctx` - 调用上下文
    /// * `keys` - 要删除的实体键
    ///
    /// # 返回值
    ///
    /// 锁标记写入失败时返回该错误且不触碰权威存储；否则返回权威存储的删除结果
    #[instrument(skip(self, ctx, keys), level = "debug", fields(key_count = keys.len()))]
    pub async fn delete_multi(&self, ctx: &CacheContext, keys: &[Key]) -> Result<()> {
        validate_keys(keys)?;
        if keys.is_empty() {
            return Ok(());
        }
        let ctx = self.lock(ctx, keys).await?;
        ctx.run("store delete", self.store.delete_multi(keys)).await
    }

    pub async fn delete(&self, ctx: &CacheContext, key: &Key) -> Result<()> {
        single(self.delete_multi(ctx, std::slice::from_ref(key)).await)
    }

    /// 批量写入实体，与删除遵循同样的先加锁再修改流程
    #[instrument(skip(self, ctx, keys, values), level = "debug", fields(key_count = keys.len()))]
    pub async fn put_multi(&self, ctx: &CacheContext, keys: &[Key], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(CacheError::InvalidKey(format!(
                "{} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        validate_keys(keys)?;
        if keys.is_empty() {
            return Ok(());
        }
        let ctx = self.lock(ctx, keys).await?;
        ctx.run("store put", self.store.put_multi(keys, values)).await
    }

    pub async fn put(&self, ctx: &CacheContext, key: &Key, value: Vec<u8>) -> Result<()> {
        single(
            self.put_multi(ctx, std::slice::from_ref(key), std::slice::from_ref(&value))
                .await,
        )
    }

    /// 批量读取实体，未加锁的缓存未命中会从权威存储回填
    ///
    /// # 返回值
    ///
    /// 与 `keys` 按位置对应的实体内容，`None` 表示实体不存在
    #[instrument(skip(self, ctx, keys), level = "debug", fields(key_count = keys.len()))]
    pub async fn get_multi(&self, ctx: &CacheContext, keys: &[Key]) -> Result<Vec<Option<Vec<u8>>>> {
        validate_keys(keys)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let ctx = self.cacher.new_context(ctx).await?;
        let cache_keys: Vec<String> = keys.iter().map(|k| self.cache_key(k)).collect();

        let cached = self.read_cache(&ctx, &cache_keys).await;
        let mut results: Vec<Option<Vec<u8>>> = vec![None; keys.len()];
        let mut pending = Vec::new();
        let mut absent = Vec::new();
        for (i, cache_key) in cache_keys.iter().enumerate() {
            match cached.get(cache_key).map(|item| CachedValue::decode(&item.value)) {
                Some(Some(CachedValue::Entity(bytes))) => results[i] = Some(bytes),
                Some(Some(CachedValue::Missing)) => {}
                // 其他写入者持有锁，或内容无法识别：绕过缓存
                Some(Some(CachedValue::Lock)) | Some(None) => pending.push(i),
                None => {
                    pending.push(i);
                    absent.push(i);
                }
            }
        }
        if pending.is_empty() {
            return Ok(results);
        }
        debug!(
            "get_multi: {} cache hits, {} to load, {} to claim",
            keys.len() - pending.len(),
            pending.len(),
            absent.len()
        );

        let claims = self.claim(&ctx, &cache_keys, &absent).await;

        let pending_keys: Vec<Key> = pending.iter().map(|&i| keys[i].clone()).collect();
        let loaded = match ctx.run("store get", self.store.get_multi(&pending_keys)).await {
            Ok(loaded) => loaded,
            Err(CacheError::Multi(me)) => return Err(CacheError::Multi(remap(me, &pending, keys.len()))),
            Err(err) => return Err(err),
        };
        for (&i, value) in pending.iter().zip(loaded) {
            results[i] = value;
        }

        self.repopulate(&ctx, claims, &results).await;
        Ok(results)
    }

    pub async fn get(&self, ctx: &CacheContext, key: &Key) -> Result<Option<Vec<u8>>> {
        let mut values = single(self.get_multi(ctx, std::slice::from_ref(key)).await)?;
        Ok(values.pop().flatten())
    }

    async fn lock(&self, ctx: &CacheContext, keys: &[Key]) -> Result<CacheContext> {
        let ctx = self.cacher.new_context(ctx).await?;
        let locks: Vec<Item> = keys
            .iter()
            .map(|key| self.lock_item(self.cache_key(key)))
            .collect();
        if let Err(err) = self.cacher.set_multi(&ctx, &locks).await {
            warn!("锁标记写入失败，放弃修改权威存储: {}", err);
            return Err(err);
        }
        Ok(ctx)
    }

    /// 读取缓存；缓存只是建议性的，读取失败按全部未命中处理
    async fn read_cache(&self, ctx: &CacheContext, cache_keys: &[String]) -> HashMap<String, Item> {
        match self.cacher.get_multi(ctx, cache_keys).await {
            Ok(fetched) => {
                if let Some(errors) = &fetched.errors {
                    debug!("cache read partially failed: {}", errors);
                }
                fetched.items
            }
            Err(err) => {
                warn!("cache read failed, falling back to store: {}", err);
                HashMap::new()
            }
        }
    }

    /// 为缓存中完全缺失的键安装本次读取自己的锁标记
    ///
    /// 返回 `(位置, 带 CAS 令牌的已观察锁标记)`，只包含确认由本次读取持有的键。
    async fn claim(&self, ctx: &CacheContext, cache_keys: &[String], absent: &[usize]) -> Vec<(usize, Item)> {
        if absent.is_empty() {
            return Vec::new();
        }
        let locks: Vec<Item> = absent
            .iter()
            .map(|&i| self.lock_item(cache_keys[i].clone()))
            .collect();
        let added: Vec<bool> = match self.cacher.add_multi(ctx, &locks).await {
            Ok(()) => vec![true; locks.len()],
            Err(CacheError::Multi(me)) => me.iter().map(|slot| slot.is_none()).collect(),
            Err(err) => {
                debug!("claiming population slots failed: {}", err);
                return Vec::new();
            }
        };

        let claimed: Vec<(usize, Item)> = absent
            .iter()
            .copied()
            .zip(locks)
            .zip(added)
            .filter_map(|(claim, added)| added.then_some(claim))
            .collect();
        if claimed.is_empty() {
            return claimed;
        }

        let claim_keys: Vec<String> = claimed.iter().map(|(i, _)| cache_keys[*i].clone()).collect();
        let observed = self.read_cache(ctx, &claim_keys).await;
        claimed
            .into_iter()
            .filter_map(|(i, lock)| {
                let seen = observed.get(&lock.key)?;
                (seen.value == lock.value && seen.flags == lock.flags).then(|| (i, seen.clone()))
            })
            .collect()
    }

    /// 把权威存储的结果 CAS 回本次读取持有的锁标记上；失败交给锁 TTL 处理
    async fn repopulate(&self, ctx: &CacheContext, claims: Vec<(usize, Item)>, results: &[Option<Vec<u8>>]) {
        let swaps: Vec<Item> = claims
            .into_iter()
            .filter_map(|(i, seen)| {
                let token = seen.cas()?.clone();
                let value = CachedValue::from_store(results[i].as_ref());
                Some(
                    Item::new(seen.key, value.encode())
                        .with_expiration(self.config.cache_ttl())
                        .with_cas(token),
                )
            })
            .collect();
        if swaps.is_empty() {
            return;
        }
        match self.cacher.compare_and_swap_multi(ctx, &swaps).await {
            Ok(()) => debug!("repopulated {} cache entries", swaps.len()),
            Err(err) => debug!("repopulation skipped: {}", err),
        }
    }
}

/// 构造锁标记：固定的哨兵值，随机令牌放在 flags 中
pub fn lock_marker(cache_key: impl Into<String>, ttl: Duration) -> Item {
    Item::new(cache_key, LOCK_SENTINEL.to_vec())
        .with_flags(rand::random::<u32>())
        .with_expiration(ttl)
}

fn validate_keys(keys: &[Key]) -> Result<()> {
    match keys.iter().position(|key| !key.is_complete()) {
        Some(i) => Err(CacheError::InvalidKey(format!(
            "key {} at position {} is incomplete",
            keys[i], i
        ))),
        None => Ok(()),
    }
}

/// 把子批次的逐项错误映射回原始请求位置
fn remap(sub: MultiError, positions: &[usize], len: usize) -> MultiError {
    let mut me = MultiError::new(len);
    for (j, err) in sub.into_errors() {
        if let Some(&i) = positions.get(j) {
            me.set(i, err);
        }
    }
    me
}

/// 单键操作直接返回该键的错误，而不是包装后的批量错误
fn single<T>(result: Result<T>) -> Result<T> {
    match result {
        Err(CacheError::Multi(mut me)) => match me.take(0) {
            Some(err) => Err(err),
            None => Err(CacheError::Multi(me)),
        },
        other => other,
    }
}
