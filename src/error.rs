//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了缓存一致性层的错误类型，以及与批量请求按位置对应的多错误容器。

use std::fmt;
use thiserror::Error;

/// 缓存系统错误类型枚举
///
/// 键级错误（`NotStored`、`CasConflict`、`CacheMiss`、`MalformedPayload` 等）
/// 总是被隔离在 [`MultiError`] 的对应位置上；只有连接级错误才会让整个批次失败。
#[derive(Error, Debug)]
pub enum CacheError {
    /// 键在权威存储中不可寻址（不完整的键），整个批次在任何副作用之前被拒绝
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// 条件写入（Add，或缺少/过期令牌的 CAS）没有生效
    #[error("Item not stored")]
    NotStored,

    /// CompareAndSwap 输给了并发写入者
    #[error("Compare-and-swap conflict")]
    CasConflict,

    /// 删除的键在缓存中不存在
    #[error("Cache miss")]
    CacheMiss,

    /// 缓存中的负载短于 flags 头部，无法解码
    #[error("Malformed payload: expected at least 4 bytes, got {len}")]
    MalformedPayload { len: usize },

    /// 负载超过允许的最大单项大小
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// 服务端脚本缓存中找不到 CAS 脚本（脚本缓存被外部清空）
    #[error("CAS script is not loaded on the server; reload the script before retrying")]
    ScriptNotLoaded,

    /// 批量操作的部分失败
    #[error("{0}")]
    Multi(MultiError),

    /// Redis错误
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    /// 连接池错误
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// 调用被取消
    #[error("Operation cancelled")]
    Cancelled,

    /// 超时错误
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// 权威存储错误
    #[error("Store error: {0}")]
    Store(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CacheError {
    /// 是否为键级错误（可以出现在 [`MultiError`] 的某个位置上）
    pub fn is_per_key(&self) -> bool {
        matches!(
            self,
            CacheError::InvalidKey(_)
                | CacheError::NotStored
                | CacheError::CasConflict
                | CacheError::CacheMiss
                | CacheError::MalformedPayload { .. }
                | CacheError::PayloadTooLarge { .. }
                | CacheError::ScriptNotLoaded
        )
    }

    /// 如果是部分失败，返回对应的 [`MultiError`]
    pub fn as_multi(&self) -> Option<&MultiError> {
        match self {
            CacheError::Multi(me) => Some(me),
            _ => None,
        }
    }
}

/// 与批量请求按位置一一对应的错误容器
///
/// 第 `i` 个位置为 `None` 表示请求中第 `i` 项成功，否则保存该项的失败原因。
/// 以 `Err(CacheError::Multi(..))` 返回时表示部分成功，调用方应逐项检查。
#[derive(Debug, Default)]
pub struct MultiError {
    slots: Vec<Option<CacheError>>,
}

impl MultiError {
    /// 创建与批量请求等长、全部为成功的容器
    pub fn new(len: usize) -> Self {
        let mut slots = Vec::with_capacity(len);
        slots.resize_with(len, || None);
        Self { slots }
    }

    /// 记录第 `index` 项的错误
    ///
    /// 越界的索引会被忽略并记录警告。
    pub fn set(&mut self, index: usize, err: CacheError) {
        match self.slots.get_mut(index) {
            Some(slot) => *slot = Some(err),
            None => tracing::warn!(
                "MultiError::set index {} out of range (len {})",
                index,
                self.slots.len()
            ),
        }
    }

    /// 获取第 `index` 项的错误
    pub fn get(&self, index: usize) -> Option<&CacheError> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    /// 取出第 `index` 项的错误
    pub fn take(&mut self, index: usize) -> Option<CacheError> {
        self.slots.get_mut(index).and_then(|slot| slot.take())
    }

    /// 批量请求长度
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// 失败的项数
    pub fn error_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// 是否至少有一项失败
    pub fn has_errors(&self) -> bool {
        self.slots.iter().any(|slot| slot.is_some())
    }

    /// 按位置遍历
    pub fn iter(&self) -> impl Iterator<Item = Option<&CacheError>> {
        self.slots.iter().map(|slot| slot.as_ref())
    }

    /// 消费容器，按位置产出失败的项
    pub fn into_errors(self) -> impl Iterator<Item = (usize, CacheError)> {
        self.slots
            .into_iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.map(|err| (i, err)))
    }

    /// 没有任何失败时返回 `Ok(())`，否则返回 `Err(CacheError::Multi(self))`
    pub fn into_result(self) -> Result<()> {
        if self.has_errors() {
            Err(CacheError::Multi(self))
        } else {
            Ok(())
        }
    }
}

impl From<Vec<Option<CacheError>>> for MultiError {
    fn from(slots: Vec<Option<CacheError>>) -> Self {
        Self { slots }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.error_count();
        let first = self
            .slots
            .iter()
            .enumerate()
            .find_map(|(i, slot)| slot.as_ref().map(|err| (i, err)));
        match first {
            Some((i, err)) if count == 1 => write!(f, "1 of {} items failed: [{}] {}", self.len(), i, err),
            Some((i, err)) => write!(
                f,
                "{} of {} items failed (first: [{}] {})",
                count,
                self.len(),
                i,
                err
            ),
            None => write!(f, "0 of {} items failed", self.len()),
        }
    }
}

impl std::error::Error for MultiError {}

/// 缓存操作结果类型别名
///
/// 简化错误处理，所有缓存操作都返回此类型
pub type Result<T> = std::result::Result<T, CacheError>;
