//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了权威存储的协作接口、实体键，以及进程内的存储实现。

use crate::error::{CacheError, MultiError, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::fmt;
use tracing::{debug, instrument};

/// 实体标识
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeyId {
    Int(i64),
    Name(String),
}

/// 权威存储中的实体键
///
/// 有标识（非零整数或非空名称）且父键（如有）也完整时，键才是完整的；
/// 不完整的键在存储中不可寻址。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Key {
    namespace: String,
    kind: String,
    id: Option<KeyId>,
    parent: Option<Box<Key>>,
}

impl Key {
    /// 创建尚未分配标识的键
    pub fn incomplete(kind: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            kind: kind.into(),
            id: None,
            parent: None,
        }
    }

    pub fn with_id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            id: Some(KeyId::Int(id)),
            ..Self::incomplete(kind)
        }
    }

    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Some(KeyId::Name(name.into())),
            ..Self::incomplete(kind)
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn child_of(mut self, parent: Key) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> Option<&KeyId> {
        self.id.as_ref()
    }

    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    pub fn is_complete(&self) -> bool {
        let has_id = match &self.id {
            Some(KeyId::Int(id)) => *id != 0,
            Some(KeyId::Name(name)) => !name.is_empty(),
            None => false,
        };
        has_id && !self.kind.is_empty() && self.parent().map_or(true, Key::is_complete)
    }

    /// 稳定的路径编码，例如 `ns/Parent,i1/Child,sname`
    ///
    /// 分隔符与 `%` 在各段中被转义，不同的键总是得到不同的编码。
    pub fn encode(&self) -> String {
        let mut out = escape(&self.namespace);
        self.write_path(&mut out);
        out
    }

    fn write_path(&self, out: &mut String) {
        if let Some(parent) = &self.parent {
            parent.write_path(out);
        }
        out.push('/');
        out.push_str(&escape(&self.kind));
        out.push(',');
        match &self.id {
            Some(KeyId::Int(id)) => {
                out.push('i');
                out.push_str(&id.to_string());
            }
            Some(KeyId::Name(name)) => {
                out.push('s');
                out.push_str(&escape(name));
            }
            None => out.push('_'),
        }
    }
}

fn escape(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' => out.push_str("%25"),
            '/' => out.push_str("%2F"),
            ',' => out.push_str("%2C"),
            _ => out.push(c),
        }
    }
    out
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// 权威存储
///
/// 所有批量操作的逐项失败通过 `Err(CacheError::Multi(..))` 按位置报告。
#[async_trait]
pub trait Store: Send + Sync {
    /// 批量读取；`None` 表示实体不存在
    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Vec<u8>>>>;

    async fn put_multi(&self, keys: &[Key], values: &[Vec<u8>]) -> Result<()>;

    /// 批量删除；删除不存在的实体不是错误
    async fn delete_multi(&self, keys: &[Key]) -> Result<()>;
}

/// 进程内存储实现
#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: DashMap<Key, Vec<u8>>,
    unavailable: DashSet<Key>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让对该键的后续操作以存储错误失败
    pub fn fail_key(&self, key: Key) {
        self.unavailable.insert(key);
    }

    pub fn restore_key(&self, key: &Key) {
        self.unavailable.remove(key);
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entities.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn check(&self, key: &Key) -> Option<CacheError> {
        if !key.is_complete() {
            return Some(CacheError::InvalidKey(format!("{} is incomplete", key)));
        }
        self.unavailable
            .contains(key)
            .then(|| CacheError::Store(format!("{} is unavailable", key)))
    }
}

#[async_trait]
impl Store for MemoryStore {
    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_multi(&self, keys: &[Key]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut errors = MultiError::new(keys.len());
        let mut values = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            if let Some(err) = self.check(key) {
                errors.set(i, err);
                values.push(None);
                continue;
            }
            values.push(self.entities.get(key).map(|v| v.value().clone()));
        }
        errors.into_result()?;
        Ok(values)
    }

    #[instrument(skip(self, keys, values), level = "debug", fields(key_count = keys.len()))]
    async fn put_multi(&self, keys: &[Key], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(CacheError::InvalidKey(format!(
                "{} keys but {} values",
                keys.len(),
                values.len()
            )));
        }
        let mut errors = MultiError::new(keys.len());
        for (i, (key, value)) in keys.iter().zip(values).enumerate() {
            match self.check(key) {
                Some(err) => errors.set(i, err),
                None => {
                    self.entities.insert(key.clone(), value.clone());
                }
            }
        }
        debug!("memory store put {} entities", keys.len() - errors.error_count());
        errors.into_result()
    }

    #[instrument(skip(self, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete_multi(&self, keys: &[Key]) -> Result<()> {
        let mut errors = MultiError::new(keys.len());
        for (i, key) in keys.iter().enumerate() {
            match self.check(key) {
                Some(err) => errors.set(i, err),
                None => {
                    self.entities.remove(key);
                }
            }
        }
        errors.into_result()
    }
}
