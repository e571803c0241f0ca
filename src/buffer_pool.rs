//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了负载编码缓冲区的复用池。
//!
//! 复用池只是性能优化：任何缓冲区都可以被丢弃而不是归还，行为上只多一次分配。

use crossbeam_queue::ArrayQueue;

/// 默认保留的空闲缓冲区数量
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// 有界的编码缓冲区复用池
///
/// 容量超过 `max_buffer_size` 的缓冲区在归还时直接丢弃，
/// 避免一次超大负载让池中长期驻留大块内存。
pub struct BufferPool {
    /// 无锁空闲队列
    free: ArrayQueue<Vec<u8>>,
    /// 允许归还的最大缓冲区容量
    max_buffer_size: usize,
}

impl BufferPool {
    /// 创建新的复用池
    ///
    /// # 参数
    ///
    /// * `capacity` - 最多保留的空闲缓冲区数量
    /// * `max_buffer_size` - 允许归还的最大缓冲区容量（字节）
    pub fn new(capacity: usize, max_buffer_size: usize) -> Self {
        Self {
            free: ArrayQueue::new(capacity.max(1)),
            max_buffer_size,
        }
    }

    /// 取出一个已清空的缓冲区
    pub fn take(&self) -> Vec<u8> {
        match self.free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Vec::new(),
        }
    }

    /// 归还缓冲区；过大或池已满时丢弃
    pub fn give(&self, buf: Vec<u8>) {
        if buf.capacity() > self.max_buffer_size {
            return;
        }
        // 池已满时 push 返回 Err(buf)，直接丢弃
        let _ = self.free.push(buf);
    }

    /// 当前空闲缓冲区数量
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("idle", &self.free.len())
            .field("capacity", &self.free.capacity())
            .field("max_buffer_size", &self.max_buffer_size)
            .finish()
    }
}
