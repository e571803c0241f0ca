//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块实现了 Redis 批量操作共用的"排队 / 单次 flush / 逐条读取回复"流水线。
//!
//! 发送端把整批命令一次写出，回复按顺序交给读取端翻译成逐项错误；
//! 两端由 `tokio::join!` 结合，读取端通过有界通道接收回复，不会存活到调用之外。
//!
//! 注意：redis-rs 的 `req_packed_commands` 在一次调用内完成写出、flush 与
//! 按序读取全部回复，因此网络层面的读取并不与写出重叠；发送端拿到的是已读完的
//! 回复，通道只负责把它们逐条交给翻译端。
//! 排队阶段被拒绝的项（如缺少 CAS 令牌、负载超限）直接记录在对应位置，
//! 永远不会发送，也不会等待其回复。

use crate::context::CacheContext;
use crate::error::{CacheError, MultiError, Result};
use redis::aio::ConnectionLike;
use redis::{Cmd, ErrorKind, Pipeline, RedisError, Value};
use tokio::sync::mpsc;
use tracing::debug;

/// 回复通道容量
const REPLY_CHANNEL_CAPACITY: usize = 128;

/// 一批待发送的命令
///
/// `queued[j]` 记录第 `j` 条已排队命令对应的请求位置。
pub(crate) struct CommandBatch {
    pipe: Pipeline,
    queued: Vec<usize>,
    rejected: MultiError,
}

impl CommandBatch {
    fn new(len: usize) -> Self {
        Self {
            pipe: redis::pipe(),
            queued: Vec::with_capacity(len),
            rejected: MultiError::new(len),
        }
    }

    /// 为请求中第 `slot` 项排队一条命令
    pub(crate) fn queue(&mut self, slot: usize, cmd: Cmd) {
        self.pipe.add_command(cmd);
        self.queued.push(slot);
    }

    /// 在排队阶段拒绝第 `slot` 项
    pub(crate) fn reject(&mut self, slot: usize, err: CacheError) {
        self.rejected.set(slot, err);
    }
}

/// 执行一批流水线命令，并按位置汇总逐项错误
///
/// # 参数
///
/// * `ctx` - 调用上下文，约束 flush 与回复读取
/// * `conn` - 已获取的连接
/// * `op` - 操作名称，用于日志与超时信息
/// * `len` - 请求的项数
/// * `build` - 为每一项排队命令或在排队阶段拒绝
/// * `translate` - 把单条回复翻译为该项的错误（成功返回 `None`）
///
/// # 返回值
///
/// flush 失败或回复数量不匹配时整批失败；否则有任何逐项错误时返回
/// `Err(CacheError::Multi(..))`。
pub(crate) async fn run_pipelined<C, B, T>(
    ctx: &CacheContext,
    conn: &mut C,
    op: &'static str,
    len: usize,
    build: B,
    translate: T,
) -> Result<()>
where
    C: ConnectionLike + Send,
    B: FnOnce(&mut CommandBatch) + Send,
    T: Fn(Value) -> Option<CacheError> + Send + Sync,
{
    let mut batch = CommandBatch::new(len);
    build(&mut batch);
    let CommandBatch {
        pipe,
        queued,
        mut rejected,
    } = batch;

    if queued.is_empty() {
        debug!("{}: nothing to send, {} items rejected at queue time", op, rejected.error_count());
        return rejected.into_result();
    }

    let count = queued.len();
    let (tx, mut rx) = mpsc::channel::<(usize, Value)>(REPLY_CHANNEL_CAPACITY.min(count));

    let sender = async move {
        debug!("{}: flushing {} commands", op, count);
        let replies = ctx
            .run(op, async {
                conn.req_packed_commands(&pipe, 0, count)
                    .await
                    .map_err(CacheError::from)
            })
            .await?;
        if replies.len() != count {
            return Err(CacheError::RedisError(RedisError::from((
                ErrorKind::ResponseError,
                "pipeline reply count mismatch",
                format!("expected {}, got {}", count, replies.len()),
            ))));
        }
        for (slot, reply) in queued.into_iter().zip(replies) {
            if tx.send((slot, reply)).await.is_err() {
                break;
            }
        }
        Ok(())
    };

    let drainer = async {
        let mut replies = MultiError::new(len);
        while let Some((slot, reply)) = rx.recv().await {
            if let Some(err) = translate(reply) {
                replies.set(slot, err);
            }
        }
        replies
    };

    let (sent, replies) = tokio::join!(sender, drainer);
    // flush 失败优先于任何逐项错误
    sent?;

    for (slot, err) in replies.into_errors() {
        rejected.set(slot, err);
    }
    rejected.into_result()
}

/// 把服务端错误回复转换为 [`RedisError`]
pub(crate) fn server_error(reply: Value) -> Option<RedisError> {
    match reply {
        Value::ServerError(err) => Some(RedisError::from(err)),
        _ => None,
    }
}
