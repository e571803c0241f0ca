//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志与链路追踪的初始化。

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// 初始化 tracing subscriber
///
/// 此函数应该在应用程序启动时调用；重复调用是安全的，已有全局 subscriber 时直接返回。
///
/// # 参数
///
/// * `default_filter` - 未设置 `RUST_LOG` 时使用的过滤规则（例如 "info" 或 "oxlock=debug"）
///
/// # 返回值
///
/// 本次调用是否安装了 subscriber
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
