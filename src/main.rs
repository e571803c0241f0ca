//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块是 oxlock 运维命令行工具的入口点。

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    oxlock::cli::run().await
}
