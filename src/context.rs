//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了调用级上下文：取消信号与截止时间。
//!
//! 所有可能阻塞的网络挂起点（获取连接、flush、读取回复）都通过
//! [`CacheContext::run`] 执行，以便取消或超时能及时中止它们。

use crate::error::{CacheError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 调用级上下文
#[derive(Clone, Debug)]
pub struct CacheContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for CacheContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheContext {
    /// 创建没有截止时间的上下文
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// 设置相对超时；已有更早的截止时间时保留较早者
    ///
    /// 超出时钟范围的超时等同于没有截止时间。
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// 设置绝对截止时间；已有更早的截止时间时保留较早者
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    /// 派生子上下文：父上下文取消时子上下文随之取消，反之不然
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// 已取消或已过截止时间时返回错误
    pub fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CacheError::Timeout("deadline already passed".to_string()));
            }
        }
        Ok(())
    }

    /// 在取消信号与截止时间的约束下执行一个挂起点
    ///
    /// # 参数
    ///
    /// * `op` - 操作名称，用于超时错误信息
    /// * `fut` - 要执行的 future
    pub async fn run<F, T>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let guarded = async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(CacheError::Cancelled),
                res = fut => res,
            }
        };
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, guarded)
                .await
                .map_err(|_| CacheError::Timeout(format!("{} exceeded the call deadline", op)))?,
            None => guarded.await,
        }
    }
}
