//! oxlock - 一致性优先的缓存层
//!
//! 在权威存储之前维护一层建议性缓存：修改实体之前先在缓存中写入带随机令牌的
//! 短期锁标记，读取路径只通过 CompareAndSwap 覆盖自己安装的锁标记，
//! 从而把缓存的陈旧窗口限制在锁的存活时间之内。
//!
//! 提供基于 Redis 流水线的缓存后端和用于测试的内存后端。

#![doc(html_root_url = "https://docs.rs/oxlock/0.1.0")]

pub use tokio;

pub mod backend;
pub mod buffer_pool;
pub mod cli;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod item;
pub mod store;
pub mod telemetry;

// Re-export commonly used items
pub use backend::{Cacher, Fetched, MemoryCacher, RedisCacher};
pub use config::Config;
pub use context::CacheContext;
pub use coordinator::{CachedValue, Coordinator};
pub use error::{CacheError, MultiError, Result};
pub use item::{CasToken, Item};
pub use store::{Key, KeyId, MemoryStore, Store};

/// oxlock 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
