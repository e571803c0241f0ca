//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了基于 Redis 的缓存后端：连接池、流水线批量写入、
//! 单次 MGET 批量读取，以及通过服务端 Lua 脚本实现的 CompareAndSwap。

use super::pipeline::{run_pipelined, server_error, CommandBatch};
use super::{Cacher, Fetched};
use crate::buffer_pool::{BufferPool, DEFAULT_POOL_CAPACITY};
use crate::config::{LimitsConfig, RedisConfig};
use crate::context::CacheContext;
use crate::error::{CacheError, MultiError, Result};
use crate::item::{expiration_millis, max_payload_size, Item};
use async_trait::async_trait;
use deadpool_redis::{Connection, Manager, Pool, Runtime};
use redis::{ErrorKind, Value};
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// CompareAndSwap 脚本
///
/// KEYS[1] = 键，ARGV[1] = 读取时的原始负载，ARGV[2] = 新负载，
/// ARGV[3] = 过期毫秒数（`-1` 表示永不过期）。
/// 当前值与令牌不一致（包括键已不存在）时返回 `CASCONFLICT` 错误。
pub const CAS_SCRIPT: &str = r#"
local current = redis.call("GET", KEYS[1])
if current ~= ARGV[1] then
  return redis.error_reply("CASCONFLICT stale compare-and-swap token")
end
local ttl = tonumber(ARGV[3])
if ttl > 0 then
  return redis.call("SET", KEYS[1], ARGV[2], "PX", ttl)
end
return redis.call("SET", KEYS[1], ARGV[2])
"#;

/// 脚本冲突回复的错误码
const CAS_CONFLICT_CODE: &str = "CASCONFLICT";

/// 写入模式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SetMode {
    Always,
    IfAbsent,
}

/// 基于 Redis 的缓存后端
///
/// 实例本身无会话状态，可以跨任务共享；脚本 SHA 在构造时加载并保存在实例中。
pub struct RedisCacher {
    pool: Pool,
    cas_sha: String,
    buffers: BufferPool,
    max_payload: usize,
    command_timeout: Option<Duration>,
}

impl std::fmt::Debug for RedisCacher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacher")
            .field("cas_sha", &self.cas_sha)
            .field("max_payload", &self.max_payload)
            .field("buffers", &self.buffers)
            .finish()
    }
}

impl RedisCacher {
    /// 根据配置创建连接池并加载 CAS 脚本
    ///
    /// # 参数
    ///
    /// * `config` - Redis 连接配置
    /// * `limits` - 负载大小限制
    ///
    /// # 返回值
    ///
    /// 返回新的 RedisCacher 实例或错误
    #[instrument(skip(config, limits), level = "info", name = "init_redis_cacher")]
    pub async fn new(config: &RedisConfig, limits: &LimitsConfig) -> Result<Self> {
        let manager = Manager::new(config.connection_string.expose_secret())
            .map_err(CacheError::from)?;
        let mut builder = Pool::builder(manager)
            .max_size(config.pool_size)
            .runtime(Runtime::Tokio1);
        if config.connection_timeout_ms > 0 {
            let timeout = Duration::from_millis(config.connection_timeout_ms);
            builder = builder.wait_timeout(Some(timeout)).create_timeout(Some(timeout));
        }
        let pool = builder
            .build()
            .map_err(|e| CacheError::Pool(e.to_string()))?;

        let mut cacher = Self::with_pool(pool, limits.max_record_size).await?;
        if config.command_timeout_ms > 0 {
            cacher.command_timeout = Some(Duration::from_millis(config.command_timeout_ms));
        }
        Ok(cacher)
    }

    /// 使用已有连接池创建实例，并注册 CAS 脚本
    ///
    /// # 参数
    ///
    /// * `pool` - Redis 连接池
    /// * `max_record_size` - 权威存储的最大记录大小
    pub async fn with_pool(pool: Pool, max_record_size: usize) -> Result<Self> {
        let max_payload = max_payload_size(max_record_size);
        let mut conn = pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;
        let cas_sha = load_script(&mut conn).await?;
        info!("Redis cacher ready, CAS script sha {}", cas_sha);
        Ok(Self {
            pool,
            cas_sha,
            buffers: BufferPool::new(DEFAULT_POOL_CAPACITY, max_payload),
            max_payload,
            command_timeout: None,
        })
    }

    /// 已注册脚本的 SHA
    pub fn script_sha(&self) -> &str {
        &self.cas_sha
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// 在服务端脚本缓存被清空后重新注册 CAS 脚本
    ///
    /// 脚本内容固定，SHA 不会改变；返回服务端确认的 SHA。
    #[instrument(skip(self), level = "info")]
    pub async fn reload_script(&self) -> Result<String> {
        let mut conn = self.connection(&CacheContext::new()).await?;
        let sha = load_script(&mut conn).await?;
        if sha != self.cas_sha {
            return Err(CacheError::RedisError(redis::RedisError::from((
                ErrorKind::ResponseError,
                "CAS script sha changed after reload",
                format!("expected {}, got {}", self.cas_sha, sha),
            ))));
        }
        info!("CAS script re-registered: {}", sha);
        Ok(sha)
    }

    async fn connection(&self, ctx: &CacheContext) -> Result<Connection> {
        ctx.run("pool acquire", async {
            self.pool
                .get()
                .await
                .map_err(|e| CacheError::Pool(e.to_string()))
        })
        .await
    }

    /// 把 SET / SET NX 命令排入批次
    fn queue_sets(&self, batch: &mut CommandBatch, items: &[Item], mode: SetMode) {
        let mut buf = self.buffers.take();
        for (i, item) in items.iter().enumerate() {
            let size = item.payload_len();
            if size > self.max_payload {
                batch.reject(
                    i,
                    CacheError::PayloadTooLarge {
                        size,
                        max: self.max_payload,
                    },
                );
                continue;
            }
            item.encode_into(&mut buf);
            let mut cmd = redis::cmd("SET");
            cmd.arg(&item.key).arg(buf.as_slice());
            if mode == SetMode::IfAbsent {
                cmd.arg("NX");
            }
            if let Some(ms) = expiration_millis(item.expiration) {
                cmd.arg("PX").arg(ms);
            }
            batch.queue(i, cmd);
        }
        self.buffers.give(buf);
    }

    /// 把 EVALSHA 命令排入批次；没有令牌的项在排队阶段拒绝
    fn queue_swaps(&self, batch: &mut CommandBatch, items: &[Item]) {
        let mut buf = self.buffers.take();
        for (i, item) in items.iter().enumerate() {
            let Some(token) = item.cas() else {
                batch.reject(i, CacheError::NotStored);
                continue;
            };
            let size = item.payload_len();
            if size > self.max_payload {
                batch.reject(
                    i,
                    CacheError::PayloadTooLarge {
                        size,
                        max: self.max_payload,
                    },
                );
                continue;
            }
            item.encode_into(&mut buf);
            let ttl = expiration_millis(item.expiration)
                .map(|ms| i64::try_from(ms).unwrap_or(i64::MAX))
                .unwrap_or(-1);
            let mut cmd = redis::cmd("EVALSHA");
            cmd.arg(&self.cas_sha)
                .arg(1)
                .arg(&item.key)
                .arg(token.as_bytes())
                .arg(buf.as_slice())
                .arg(ttl);
            batch.queue(i, cmd);
        }
        self.buffers.give(buf);
    }

    async fn write_items(
        &self,
        ctx: &CacheContext,
        op: &'static str,
        items: &[Item],
        mode: SetMode,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection(ctx).await?;
        run_pipelined(
            ctx,
            &mut conn,
            op,
            items.len(),
            |batch| self.queue_sets(batch, items, mode),
            move |reply| set_reply(reply, mode),
        )
        .await
    }
}

async fn load_script(conn: &mut Connection) -> Result<String> {
    let sha: String = redis::cmd("SCRIPT")
        .arg("LOAD")
        .arg(CAS_SCRIPT)
        .query_async(conn)
        .await?;
    debug!("SCRIPT LOAD -> {}", sha);
    Ok(sha)
}

fn set_reply(reply: Value, mode: SetMode) -> Option<CacheError> {
    match reply {
        Value::Nil if mode == SetMode::IfAbsent => Some(CacheError::NotStored),
        other => server_error(other).map(CacheError::from),
    }
}

fn swap_reply(reply: Value) -> Option<CacheError> {
    match reply {
        Value::Nil => Some(CacheError::NotStored),
        other => server_error(other).map(swap_error),
    }
}

fn swap_error(err: redis::RedisError) -> CacheError {
    if err.code() == Some(CAS_CONFLICT_CODE) {
        CacheError::CasConflict
    } else if err.kind() == ErrorKind::NoScriptError {
        warn!("CAS script missing from server script cache: {}", err);
        CacheError::ScriptNotLoaded
    } else {
        CacheError::from(err)
    }
}

fn delete_reply(reply: Value) -> Option<CacheError> {
    match reply {
        Value::Int(1) => None,
        Value::Int(_) => Some(CacheError::CacheMiss),
        other => server_error(other).map(CacheError::from),
    }
}

#[async_trait]
impl Cacher for RedisCacher {
    async fn new_context(&self, ctx: &CacheContext) -> Result<CacheContext> {
        ctx.check()?;
        let session = ctx.child();
        Ok(match self.command_timeout {
            Some(timeout) => session.with_timeout(timeout),
            None => session,
        })
    }

    #[instrument(skip(self, ctx, items), level = "debug", fields(item_count = items.len()))]
    async fn add_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()> {
        self.write_items(ctx, "add_multi", items, SetMode::IfAbsent)
            .await
    }

    #[instrument(skip(self, ctx, items), level = "debug", fields(item_count = items.len()))]
    async fn set_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()> {
        self.write_items(ctx, "set_multi", items, SetMode::Always)
            .await
    }

    #[instrument(skip(self, ctx, items), level = "debug", fields(item_count = items.len()))]
    async fn compare_and_swap_multi(&self, ctx: &CacheContext, items: &[Item]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection(ctx).await?;
        run_pipelined(
            ctx,
            &mut conn,
            "compare_and_swap_multi",
            items.len(),
            |batch| self.queue_swaps(batch, items),
            swap_reply,
        )
        .await
    }

    #[instrument(skip(self, ctx, keys), level = "debug", fields(key_count = keys.len()))]
    async fn get_multi(&self, ctx: &CacheContext, keys: &[String]) -> Result<Fetched> {
        if keys.is_empty() {
            return Ok(Fetched::default());
        }
        let mut conn = self.connection(ctx).await?;
        let values: Vec<Option<Vec<u8>>> = ctx
            .run("get_multi", async {
                redis::cmd("MGET")
                    .arg(keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(CacheError::from)
            })
            .await?;
        if values.len() != keys.len() {
            return Err(CacheError::RedisError(redis::RedisError::from((
                ErrorKind::ResponseError,
                "MGET reply length mismatch",
                format!("expected {}, got {}", keys.len(), values.len()),
            ))));
        }

        let mut items = HashMap::with_capacity(keys.len());
        let mut errors = MultiError::new(keys.len());
        for (i, (key, value)) in keys.iter().zip(values).enumerate() {
            let Some(raw) = value else { continue };
            match Item::decode(key.clone(), raw) {
                Ok(item) => {
                    items.insert(key.clone(), item);
                }
                Err(err) => errors.set(i, err),
            }
        }
        debug!("get_multi: {} of {} keys hit", items.len(), keys.len());
        Ok(Fetched {
            items,
            errors: errors.has_errors().then_some(errors),
        })
    }

    #[instrument(skip(self, ctx, keys), level = "debug", fields(key_count = keys.len()))]
    async fn delete_multi(&self, ctx: &CacheContext, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection(ctx).await?;
        run_pipelined(
            ctx,
            &mut conn,
            "delete_multi",
            keys.len(),
            |batch| {
                for (i, key) in keys.iter().enumerate() {
                    let mut cmd = redis::cmd("DEL");
                    cmd.arg(key);
                    batch.queue(i, cmd);
                }
            },
            delete_reply,
        )
        .await
    }
}
