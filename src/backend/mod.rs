//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存后端的能力集接口，以及内存实现和基于 Redis 流水线的实现。

pub mod memory;
pub(crate) mod pipeline;
pub mod redis;

use crate::context::CacheContext;
use crate::error::{MultiError, Result};
use crate::item::Item;
use async_trait::async_trait;
use std::collections::HashMap;

pub use self::memory::MemoryCacher;
pub use self::redis::RedisCacher;

/// 批量读取结果
///
/// `items` 只包含命中的键；未命中不是错误。
/// `errors` 与请求的键按位置对应，仅在有键级失败（如负载损坏）时存在。
#[derive(Debug, Default)]
pub struct Fetched {
    pub items: HashMap<String, Item>,
    pub errors: Option<MultiError>,
}

impl Fetched {
    pub fn get(&self, key: &str) -> Option<&Item> {
        self.items.get(key)
    }

    pub fn is_partial(&self) -> bool {
        self.errors.is_some()
    }

    /// 有键级失败时返回 `Err(CacheError::Multi(..))`，否则返回命中的项
    pub fn into_result(self) -> Result<HashMap<String, Item>> {
        match self.errors {
            Some(me) => me.into_result().map(|_| self.items),
            None => Ok(self.items),
        }
    }
}

/// 缓存后端能力集
///
/// 每个操作都是对一批键/项的批量操作，返回值有三种形态：
/// - `Ok(..)`：全部成功
/// - `Err(CacheError::Multi(..))`：部分成功，逐项检查
/// - 其他 `Err`：整批失败（如连接失败）
#[async_trait]
pub trait Cacher: Send + Sync {
    /// 建立调用级会话；无状态后端应当廉价且无副作用
    async fn new_context(&self, ctx: &CacheContext) -> Result<CacheContext>;

    /// 仅当键不存在时写入；已存在的项以 `NotStored` 失败
    async fn add_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()>;

    /// 无条件写入，覆盖任何旧值（包括锁标记）
    async fn set_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()>;

    /// 携带读取时 CAS 令牌的条件写入
    ///
    /// 没有令牌的项以 `NotStored` 失败；服务端当前值与令牌不一致时以 `CasConflict` 失败。
    async fn compare_and_swap_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()>;

    /// 批量读取；缺失的键不出现在结果中
    async fn get_multi(&self, ctx: &CacheContext, keys: &[String]) -> Result<Fetched>;

    /// 批量删除；不存在的键以 `CacheMiss` 失败
    async fn delete_multi(&self, ctx: &CacheContext, keys: &[String]) -> Result<()>;
}
